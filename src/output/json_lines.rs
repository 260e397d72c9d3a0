// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/output/json_lines.rs - 标准输出 JSON 行
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

use std::{
  io::Write,
  sync::atomic::{AtomicU64, Ordering},
};

use chrono::Local;
use image::RgbImage;
use serde_json::{Value, json};
use thiserror::Error;

use crate::{
  FromUrl, FromUrlWithScheme,
  cascade::CascadeReport,
  output::{Render, result_sink::TIMESTAMP_FORMAT},
};

#[derive(Error, Debug)]
pub enum JsonLinesOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("写入标准输出失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化失败: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 每个采样帧向标准输出打印一行 JSON
#[derive(Default)]
pub struct JsonLinesOutput {
  frames: AtomicU64,
}

impl FromUrlWithScheme for JsonLinesOutput {
  const SCHEME: &'static str = "stdout";
}

impl FromUrl for JsonLinesOutput {
  type Error = JsonLinesOutputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JsonLinesOutputError::SchemeMismatch);
    }
    Ok(Self::default())
  }
}

pub fn report_to_json(frame: u64, image: &RgbImage, report: &CascadeReport) -> Value {
  let objects: Vec<Value> = report
    .objects
    .iter()
    .map(|object| {
      json!({
        "bbox": [object.bbox.x1, object.bbox.y1, object.bbox.x2, object.bbox.y2],
        "confidence": object.confidence,
        "category": object.category,
        "subcategory": object.subcategory_name(),
      })
    })
    .collect();

  json!({
    "timestamp": Local::now().format(TIMESTAMP_FORMAT).to_string(),
    "frame": frame,
    "width": image.width(),
    "height": image.height(),
    "objects": objects,
    "skipped": report.skipped,
  })
}

impl Render<RgbImage, CascadeReport> for JsonLinesOutput {
  type Error = JsonLinesOutputError;

  fn render_result(&self, frame: &RgbImage, result: &CascadeReport) -> Result<(), Self::Error> {
    let index = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
    let line = serde_json::to_string(&report_to_json(index, frame, result))?;

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", line)?;
    stdout.flush()?;
    Ok(())
  }
}
