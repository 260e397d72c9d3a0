// 该文件是 Huishou （回收分拣） 项目的一部分。
// tests/common/mod.rs - 集成测试用的模型桩
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

#![allow(dead_code)]

use std::{
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
};

use image::RgbImage;

use huishou::{
  cascade::ClassificationCascade,
  config::{CascadeConfig, CategoryEntry},
  model::{BBox, DetectResult, Detection, Logits, Model, ModelError},
  registry::{ModelLoadError, SubclassifierLoader},
};

/// 返回固定检测结果，或者固定失败
pub enum ScriptedDetector {
  Detections(Vec<Detection>),
  Fail,
}

impl Model for ScriptedDetector {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, _input: &RgbImage) -> Result<DetectResult, ModelError> {
    match self {
      ScriptedDetector::Detections(items) => Ok(items.clone().into()),
      ScriptedDetector::Fail => Err(ModelError::Backend("检测器不可用".to_string())),
    }
  }
}

/// 总是预测第 `index` 个类别
pub struct OneHot {
  pub index: usize,
  pub len: usize,
}

impl Model for OneHot {
  type Input = RgbImage;
  type Output = Logits;
  type Error = ModelError;

  fn infer(&self, _input: &RgbImage) -> Result<Logits, ModelError> {
    let mut logits = vec![0.0f32; self.len];
    logits[self.index] = 1.0;
    Ok(logits.into())
  }
}

/// 子分类模型预测最后一个标签，并统计加载次数
#[derive(Default, Clone)]
pub struct CountingLoader {
  pub loads: Arc<AtomicUsize>,
  pub fail: bool,
}

impl CountingLoader {
  /// 每次加载都失败
  pub fn failing() -> Self {
    Self {
      fail: true,
      ..Self::default()
    }
  }

  pub fn loads(&self) -> usize {
    self.loads.load(Ordering::SeqCst)
  }
}

impl SubclassifierLoader for CountingLoader {
  type Model = OneHot;

  fn load(&self, entry: &CategoryEntry) -> Result<OneHot, ModelLoadError> {
    self.loads.fetch_add(1, Ordering::SeqCst);
    if self.fail {
      return Err(ModelLoadError::new(entry.name.as_str(), "检查点目录为空"));
    }
    let len = entry.subclasses.len();
    Ok(OneHot {
      index: len - 1,
      len,
    })
  }
}

pub type StubCascade = ClassificationCascade<ScriptedDetector, OneHot, CountingLoader>;

pub fn category_index(name: &str) -> usize {
  let config = CascadeConfig::builtin().unwrap();
  config.categories.iter().position(|c| c == name).unwrap()
}

/// 使用内置配置，类别分类器总是预测 `category`
pub fn cascade(detector: ScriptedDetector, category: &str, loader: CountingLoader) -> StubCascade {
  let config = CascadeConfig::builtin().unwrap();
  let classifier = OneHot {
    index: category_index(category),
    len: config.categories.len(),
  };
  ClassificationCascade::new(
    detector,
    classifier,
    loader,
    Arc::new(config.taxonomy()),
    &config.thresholds,
  )
}

pub fn detection(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Detection {
  Detection {
    bbox: BBox::new(x1, y1, x2, y2),
    confidence,
  }
}

pub fn write_image(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
  let path = dir.join(name);
  RgbImage::from_pixel(width, height, image::Rgb([90, 120, 60]))
    .save(&path)
    .unwrap();
  path
}
