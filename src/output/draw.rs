// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/output/draw.rs - 分类结果可视化
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;

use crate::{
  cascade::{CascadeReport, ClassifiedObject},
  model::BBox,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_COLOR: [u8; 3] = [0, 255, 0];
const BOX_THICKNESS: i32 = 2;
const DEFAULT_TOP_K: usize = 3;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("读取字体文件失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 在帧上绘制置信度最高的若干目标
///
/// 没有字体时只画边框。
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_color: [u8; 3],
  top_k: usize,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_color: LABEL_COLOR,
      top_k: DEFAULT_TOP_K,
    }
  }
}

impl Draw {
  pub fn with_font_file(mut self, path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    self.font = Some(FontArc::try_from_vec(data)?);
    Ok(self)
  }

  pub fn top_k(mut self, top_k: usize) -> Self {
    self.top_k = top_k;
    self
  }

  pub fn annotate(&self, frame: &RgbImage, report: &CascadeReport) -> RgbImage {
    let mut image = frame.clone();
    self.draw_report(&mut image, report);
    image
  }

  pub fn draw_report(&self, image: &mut RgbImage, report: &CascadeReport) {
    for object in report.top(self.top_k) {
      self.draw_object(image, object);
    }
  }

  fn draw_object(&self, image: &mut RgbImage, object: &ClassifiedObject) {
    let Some(rect) = to_rect(&object.bbox, image.width(), image.height()) else {
      return;
    };
    let color = Rgb(self.label_color);

    for thickness in 0..BOX_THICKNESS {
      let inner_w = rect.width() as i32 - 2 * thickness;
      let inner_h = rect.height() as i32 - 2 * thickness;
      if inner_w <= 0 || inner_h <= 0 {
        break;
      }
      let inner = Rect::at(rect.left() + thickness, rect.top() + thickness)
        .of_size(inner_w as u32, inner_h as u32);
      draw_hollow_rect_mut(image, inner, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = object.to_string();
    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;

    // 标签放在边框上方，空间不足时贴住图像顶部
    let label_x = rect.left();
    let label_y = (rect.top() - self.label_text_height).max(0);
    let label_width = text_width.min(image.width() as i32 - label_x);
    if label_width <= 0 {
      return;
    }

    let background = Rect::at(label_x, label_y).of_size(label_width as u32, self.label_text_height as u32);
    draw_filled_rect_mut(image, background, color);
    draw_text_mut(
      image,
      Rgb([0u8, 0, 0]),
      label_x,
      label_y + LABEL_TEXT_VERTICAL_PADDING,
      PxScale::from(self.font_size),
      font,
      &label,
    );
  }
}

fn to_rect(bbox: &BBox, width: u32, height: u32) -> Option<Rect> {
  let pixel = bbox.clamp_to(width, height)?;
  Some(Rect::at(pixel.x as i32, pixel.y as i32).of_size(pixel.width, pixel.height))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    cascade::Subcategory,
    config::{CascadeConfig, CategoryId},
  };

  fn object(x1: f32, confidence: f32) -> ClassifiedObject {
    let taxonomy = CascadeConfig::builtin().unwrap().taxonomy();
    let category_id: CategoryId = taxonomy.id_of("cans").unwrap();
    ClassifiedObject {
      bbox: BBox::new(x1, 10.0, x1 + 10.0, 30.0),
      confidence,
      category_id,
      category: "cans".to_string(),
      subcategory: Subcategory::Sentinel,
    }
  }

  #[test]
  fn only_top_objects_are_drawn() {
    let report = CascadeReport {
      objects: vec![
        object(0.0, 0.5),
        object(20.0, 0.9),
        object(40.0, 0.8),
        object(60.0, 0.7),
      ],
      skipped: 0,
    };
    let frame = RgbImage::new(100, 50);
    let image = Draw::default().annotate(&frame, &report);

    let color = Rgb(LABEL_COLOR);
    assert_eq!(*image.get_pixel(20, 10), color);
    assert_eq!(*image.get_pixel(40, 10), color);
    assert_eq!(*image.get_pixel(60, 10), color);
    // 置信度最低的目标不绘制
    assert_eq!(*image.get_pixel(0, 10), Rgb([0, 0, 0]));
    // 原始帧不被修改
    assert_eq!(*frame.get_pixel(20, 10), Rgb([0, 0, 0]));
  }
}
