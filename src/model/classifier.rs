// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/model/classifier.rs - 图像分类模型
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

use std::path::Path;

use image::RgbImage;
use tracing::{debug, info};

use crate::{
  config::{CategoryEntry, Device, Preprocess},
  frame::classifier_input,
  model::{Logits, Model, ModelError, OnnxSession},
  registry::{ModelLoadError, SubclassifierLoader},
};

pub struct OnnxClassifier {
  session: OnnxSession,
  preprocess: Preprocess,
}

impl OnnxClassifier {
  pub fn load(
    location: impl AsRef<Path>,
    device: &Device,
    preprocess: Preprocess,
  ) -> Result<Self, ModelError> {
    info!("加载分类模型: {}", location.as_ref().display());
    Ok(Self {
      session: OnnxSession::load(location, device)?,
      preprocess,
    })
  }
}

impl Model for OnnxClassifier {
  type Input = RgbImage;
  type Output = Logits;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let tensor = classifier_input(input, &self.preprocess);
    let (shape, data) = self.session.run(tensor)?;
    if shape.first().copied().unwrap_or(0) != 1 {
      return Err(ModelError::OutputShape {
        expected: "[1, classes]".to_string(),
        actual: shape,
      });
    }
    debug!("分类输出 {} 维", data.len());
    Ok(data.into())
  }
}

/// 按类别配置加载子分类模型
pub struct OnnxSubclassifierLoader {
  device: Device,
}

impl OnnxSubclassifierLoader {
  pub fn new(device: Device) -> Self {
    Self { device }
  }
}

impl SubclassifierLoader for OnnxSubclassifierLoader {
  type Model = OnnxClassifier;

  fn load(&self, entry: &CategoryEntry) -> Result<Self::Model, ModelLoadError> {
    let checkpoint = entry
      .checkpoint
      .as_ref()
      .ok_or_else(|| ModelLoadError::new(&entry.name, "未配置模型路径"))?;

    OnnxClassifier::load(checkpoint, &self.device, entry.preprocess.clone())
      .map_err(|e| ModelLoadError::new(&entry.name, e))
  }
}
