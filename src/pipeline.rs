// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/pipeline.rs - 检测分类流水线
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! # 流水线
//!
//! [`Pipeline`] 把级联分类器与结果存储组合在一起：
//!
//! - [`Pipeline::classify_image`] 读取图像文件，分类后把每个结果追加到存储
//! - [`Pipeline::classify_frame`] 只对内存中的帧分类，是否持久化由调用方决定

use std::{error::Error as StdError, fmt, path::Path};

use chrono::Local;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  cascade::{CascadeReport, ClassificationCascade, DetectionError},
  input::{ImageFileInputError, read_rgb_image},
  model::{DetectResult, Logits, Model},
  output::{ClassificationRecord, ResultSink, SinkError},
  registry::SubclassifierLoader,
  stream::ClassifyFrame,
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("读取图像失败: {0}")]
  Decode(#[from] ImageFileInputError),
  #[error(transparent)]
  Detection(#[from] DetectionError),
  #[error("写入结果失败: {0}")]
  Sink(#[from] SinkError),
}

/// 一张图像的分类结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReport {
  pub source_name: String,
  /// 已追加到存储的记录，顺序与写入顺序一致
  pub records: Vec<ClassificationRecord>,
  pub skipped: usize,
}

impl ImageReport {
  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }
}

pub struct Pipeline<D, C, L: SubclassifierLoader, S> {
  cascade: ClassificationCascade<D, C, L>,
  sink: S,
}

impl<D, C, L, S> Pipeline<D, C, L, S>
where
  D: Model<Input = RgbImage, Output = DetectResult>,
  D::Error: Into<Box<dyn StdError + Send + Sync>>,
  C: Model<Input = RgbImage, Output = Logits>,
  C::Error: fmt::Display,
  L: SubclassifierLoader,
  L::Model: Model<Input = RgbImage, Output = Logits>,
  <L::Model as Model>::Error: fmt::Display,
  S: ResultSink,
{
  pub fn new(cascade: ClassificationCascade<D, C, L>, sink: S) -> Self {
    Self { cascade, sink }
  }

  pub fn cascade(&self) -> &ClassificationCascade<D, C, L> {
    &self.cascade
  }

  pub fn sink(&self) -> &S {
    &self.sink
  }

  /// 读取并分类一张图像，结果按顺序追加到存储
  ///
  /// 检测器失败时返回 [`PipelineError::Detection`]，存储不会被修改。
  /// 没有检测到目标时返回空结果，同样不写入任何内容。
  pub fn classify_image(&self, path: impl AsRef<Path>) -> Result<ImageReport, PipelineError> {
    let path = path.as_ref();
    let source_name = path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_else(|| path.display().to_string());

    debug!("读取图像 {}", path.display());
    let image = read_rgb_image(path)?;
    let report = self.cascade.run(&image)?;
    let timestamp = Local::now().naive_local();

    let mut records = Vec::with_capacity(report.objects.len());
    for (index, object) in report.objects.iter().enumerate() {
      let record = ClassificationRecord::from_object(timestamp, source_name.as_str(), index + 1, object);
      self.sink.append(&record)?;
      records.push(record);
    }

    info!(
      "{}: {} 个目标, 跳过 {} 个",
      source_name,
      records.len(),
      report.skipped
    );
    Ok(ImageReport {
      source_name,
      records,
      skipped: report.skipped,
    })
  }

  /// 分类内存中的一帧，不写入存储
  pub fn classify_frame(&self, frame: &RgbImage) -> Result<CascadeReport, DetectionError> {
    self.cascade.run(frame)
  }
}

impl<D, C, L, S> ClassifyFrame for Pipeline<D, C, L, S>
where
  D: Model<Input = RgbImage, Output = DetectResult>,
  D::Error: Into<Box<dyn StdError + Send + Sync>>,
  C: Model<Input = RgbImage, Output = Logits>,
  C::Error: fmt::Display,
  L: SubclassifierLoader,
  L::Model: Model<Input = RgbImage, Output = Logits>,
  <L::Model as Model>::Error: fmt::Display,
  S: ResultSink,
{
  fn classify_frame(&self, frame: &RgbImage) -> Result<CascadeReport, DetectionError> {
    Pipeline::classify_frame(self, frame)
  }
}

#[cfg(feature = "onnx")]
mod onnx {
  use super::Pipeline;
  use crate::{
    cascade::OnnxCascade,
    config::CascadeConfig,
    model::{ModelError, OnnxClassifier, OnnxSubclassifierLoader, YoloDetector},
    output::ResultSink,
  };

  pub type OnnxPipeline<S> = Pipeline<YoloDetector, OnnxClassifier, OnnxSubclassifierLoader, S>;

  impl<S: ResultSink> OnnxPipeline<S> {
    pub fn from_config(config: &CascadeConfig, sink: S) -> Result<Self, ModelError> {
      Ok(Pipeline::new(OnnxCascade::from_config(config)?, sink))
    }
  }
}

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxPipeline;
