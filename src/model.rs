// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/model.rs - 模型
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

use std::sync::Arc;

use thiserror::Error;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

impl<M: Model + ?Sized> Model for Arc<M> {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    (**self).infer(input)
  }
}

impl<M: Model + ?Sized> Model for Box<M> {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    (**self).infer(input)
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型文件错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("模型定位失败: {0}")]
  Checkpoint(#[from] checkpoint::CheckpointError),
  #[error("推理后端错误: {0}")]
  Backend(String),
  #[error("模型输出形状不匹配: 期望 {expected}, 实际 {actual:?}")]
  OutputShape { expected: String, actual: Vec<usize> },
  #[error("推理会话锁已损坏")]
  Poisoned,
}

impl ModelError {
  pub fn backend(err: impl std::fmt::Display) -> Self {
    ModelError::Backend(err.to_string())
  }
}

/// 像素坐标下的边界框 `[x1, y1) × [x2, y2)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

/// 图像内的整数裁剪区域
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

impl PixelRect {
  pub fn to_bbox(self) -> BBox {
    BBox {
      x1: self.x as f32,
      y1: self.y as f32,
      x2: (self.x + self.width) as f32,
      y2: (self.y + self.height) as f32,
    }
  }
}

impl BBox {
  pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  pub fn width(&self) -> f32 {
    (self.x2 - self.x1).max(0.0)
  }

  pub fn height(&self) -> f32 {
    (self.y2 - self.y1).max(0.0)
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  pub fn iou(&self, other: &BBox) -> f32 {
    let x1 = self.x1.max(other.x1);
    let y1 = self.y1.max(other.y1);
    let x2 = self.x2.min(other.x2);
    let y2 = self.y2.min(other.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > f32::EPSILON {
      intersection / union
    } else {
      0.0
    }
  }

  /// 将边界框裁剪到 `width × height` 的图像内
  ///
  /// 坐标先向下取整，再限制在 `[0, width - 1] × [0, height - 1]`，
  /// 因此返回区域内的每个像素都位于图像之内。面积为零或坐标非有限值时返回 `None`。
  pub fn clamp_to(&self, width: u32, height: u32) -> Option<PixelRect> {
    if width == 0 || height == 0 {
      return None;
    }
    if ![self.x1, self.y1, self.x2, self.y2]
      .iter()
      .all(|v| v.is_finite())
    {
      return None;
    }

    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;
    let x1 = self.x1.floor().clamp(0.0, max_x) as u32;
    let y1 = self.y1.floor().clamp(0.0, max_y) as u32;
    let x2 = self.x2.floor().clamp(0.0, max_x) as u32;
    let y2 = self.y2.floor().clamp(0.0, max_y) as u32;

    if x2 <= x1 || y2 <= y1 {
      return None;
    }

    Some(PixelRect {
      x: x1,
      y: y1,
      width: x2 - x1,
      height: y2 - y1,
    })
  }
}

/// 检测器输出的单个候选目标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub bbox: BBox,
  pub confidence: f32,
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 分类模型的原始输出
#[derive(Debug, Clone, PartialEq)]
pub struct Logits(pub Box<[f32]>);

impl Logits {
  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// 最大得分的索引，不做任何校准；含 NaN 的得分不会被选中
  pub fn argmax(&self) -> Option<usize> {
    self
      .0
      .iter()
      .enumerate()
      .filter(|(_, v)| !v.is_nan())
      .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
        Some((_, b)) if b >= v => best,
        _ => Some((i, v)),
      })
      .map(|(i, _)| i)
  }
}

impl From<Vec<f32>> for Logits {
  fn from(values: Vec<f32>) -> Self {
    Self(values.into_boxed_slice())
  }
}

pub mod checkpoint;
mod yolo;
pub use self::yolo::{Letterbox, decode_predictions, nms};

#[cfg(feature = "onnx")]
mod classifier;
#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::classifier::{OnnxClassifier, OnnxSubclassifierLoader};
#[cfg(feature = "onnx")]
pub use self::onnx::OnnxSession;
#[cfg(feature = "onnx")]
pub use self::yolo::YoloDetector;
