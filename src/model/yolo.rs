// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/model/yolo.rs - YOLO 检测器
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

use image::{Rgb, RgbImage, imageops::FilterType};
use tracing::debug;

use crate::model::{BBox, Detection, ModelError};

const LETTERBOX_FILL: u8 = 114;
const BOX_FIELDS: usize = 4;

/// 等比缩放并居中填充到正方形输入
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub scale: f32,
  pub pad_x: f32,
  pub pad_y: f32,
  pub input: u32,
}

impl Letterbox {
  pub fn fit(width: u32, height: u32, input: u32) -> Self {
    let scale = (input as f32 / width.max(1) as f32).min(input as f32 / height.max(1) as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, input);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, input);

    Self {
      scale,
      pad_x: ((input - new_w) / 2) as f32,
      pad_y: ((input - new_h) / 2) as f32,
      input,
    }
  }

  pub fn apply(&self, image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let new_w = ((width as f32 * self.scale).round() as u32).clamp(1, self.input);
    let new_h = ((height as f32 * self.scale).round() as u32).clamp(1, self.input);
    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let mut canvas = RgbImage::from_pixel(self.input, self.input, Rgb([LETTERBOX_FILL; 3]));
    image::imageops::replace(
      &mut canvas,
      &resized,
      self.pad_x as i64,
      self.pad_y as i64,
    );
    canvas
  }

  /// 模型输入坐标 → 源图像坐标
  pub fn to_source(&self, bbox: BBox) -> BBox {
    BBox {
      x1: (bbox.x1 - self.pad_x) / self.scale,
      y1: (bbox.y1 - self.pad_y) / self.scale,
      x2: (bbox.x2 - self.pad_x) / self.scale,
      y2: (bbox.y2 - self.pad_y) / self.scale,
    }
  }
}

/// 解析 YOLOv8 风格的输出张量
///
/// 支持 `[1, 4 + nc, anchors]` 与 `[1, anchors, 4 + nc]` 两种排布，
/// 每个候选框取各类别得分的最大值作为置信度。
pub fn decode_predictions(
  data: &[f32],
  shape: &[usize],
  letterbox: &Letterbox,
  confidence: f32,
) -> Result<Vec<Detection>, ModelError> {
  let shape_error = || ModelError::OutputShape {
    expected: "[1, 4 + nc, anchors] 或 [1, anchors, 4 + nc]".to_string(),
    actual: shape.to_vec(),
  };

  let &[1, d1, d2] = shape else {
    return Err(shape_error());
  };
  if d1 * d2 != data.len() {
    return Err(shape_error());
  }

  // 候选框数量通常远大于特征数
  let (features, anchors, transposed) = if d1 <= d2 {
    (d1, d2, true)
  } else {
    (d2, d1, false)
  };
  if features <= BOX_FIELDS {
    return Err(shape_error());
  }

  let at = |anchor: usize, feature: usize| {
    if transposed {
      data[feature * anchors + anchor]
    } else {
      data[anchor * features + feature]
    }
  };

  let mut detections = Vec::new();
  for anchor in 0..anchors {
    let score = (BOX_FIELDS..features)
      .map(|f| at(anchor, f))
      .fold(f32::NEG_INFINITY, f32::max);
    if !score.is_finite() || score < confidence {
      continue;
    }

    let (cx, cy, w, h) = (at(anchor, 0), at(anchor, 1), at(anchor, 2), at(anchor, 3));
    if !(cx.is_finite() && cy.is_finite() && w > 0.0 && h > 0.0) {
      continue;
    }

    let bbox = letterbox.to_source(BBox {
      x1: cx - w / 2.0,
      y1: cy - h / 2.0,
      x2: cx + w / 2.0,
      y2: cy + h / 2.0,
    });
    detections.push(Detection {
      bbox,
      confidence: score.min(1.0),
    });
  }

  debug!("候选框 {} 个, 超过阈值 {} 个", anchors, detections.len());
  Ok(detections)
}

/// 贪心非极大值抑制，与类别无关
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
  for candidate in detections {
    if kept
      .iter()
      .all(|k| k.bbox.iou(&candidate.bbox) < iou_threshold)
    {
      kept.push(candidate);
    }
  }
  kept
}

#[cfg(feature = "onnx")]
mod detector {
  use std::path::Path;

  use image::RgbImage;
  use tracing::{debug, info};

  use super::{Letterbox, decode_predictions, nms};
  use crate::{
    config::{Device, Thresholds},
    frame::NchwTensor,
    model::{DetectResult, Model, ModelError, OnnxSession},
  };

  pub struct YoloDetector {
    session: OnnxSession,
    input_size: u32,
    confidence: f32,
    iou: f32,
  }

  impl YoloDetector {
    pub fn load(
      location: impl AsRef<Path>,
      device: &Device,
      input_size: u32,
      thresholds: &Thresholds,
    ) -> Result<Self, ModelError> {
      info!("加载检测模型: {}", location.as_ref().display());
      let session = OnnxSession::load(location, device)?;
      Ok(Self {
        session,
        input_size,
        confidence: thresholds.detector_confidence,
        iou: thresholds.detector_iou,
      })
    }
  }

  impl Model for YoloDetector {
    type Input = RgbImage;
    type Output = DetectResult;
    type Error = ModelError;

    fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
      let (width, height) = input.dimensions();
      let letterbox = Letterbox::fit(width, height, self.input_size);
      let tensor = NchwTensor::from_rgb_unit(&letterbox.apply(input));

      debug!("执行检测推理: {}x{}", width, height);
      let (shape, data) = self.session.run(tensor)?;
      let candidates = decode_predictions(&data, &shape, &letterbox, self.confidence)?;
      let items = nms(candidates, self.iou);
      debug!("检测到 {} 个物体", items.len());

      Ok(items.into())
    }
  }
}

#[cfg(feature = "onnx")]
pub use self::detector::YoloDetector;
