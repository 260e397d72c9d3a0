// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
  path::{Path, PathBuf},
  sync::Mutex,
};

use chrono::{Datelike, Local};
use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  cascade::CascadeReport,
  output::{
    Render,
    draw::{Draw, DrawError},
  },
  url_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("路径编码错误: {0}")]
  PathEncoding(#[from] std::string::FromUtf8Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("绘制器初始化失败: {0}")]
  DrawError(#[from] DrawError),
  #[error("帧计数器锁已损坏")]
  Poisoned,
}

/// 按日期目录保存标注后的帧
///
/// URL 形如 `folder:///data/frames?always&record&font=/usr/share/fonts/x.ttf`：
/// `always` 时没有目标的帧也保存，`record` 时另存一份文本结果。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  frame_counter: Mutex<u32>,
  always: bool,
  record: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let mut draw = Draw::default();
    let mut always = false;
    let mut record = false;
    for (key, value) in uri.query_pairs() {
      match key.as_ref() {
        "always" => always = true,
        "record" => record = true,
        "font" => draw = draw.with_font_file(&*value)?,
        "top" => {
          if let Ok(top_k) = value.parse() {
            draw = draw.top_k(top_k);
          }
        }
        _ => {}
      }
    }

    Ok(Self::new(url_path(uri)?, draw, always, record))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>, draw: Draw, always: bool, record: bool) -> Self {
    Self {
      directory: directory.into(),
      draw,
      frame_counter: Mutex::new(0),
      always,
      record,
    }
  }

  fn frame_id(&self) -> Result<u32, DirectoryRecordOutputError> {
    let mut counter = self
      .frame_counter
      .lock()
      .map_err(|_| DirectoryRecordOutputError::Poisoned)?;
    *counter = counter.wrapping_add(1);
    Ok(*counter)
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Local::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()?
    )))
  }

  fn write_record(path: &Path, report: &CascadeReport) -> Result<(), std::io::Error> {
    let lines: Vec<String> = report
      .objects
      .iter()
      .map(|object| {
        format!(
          "{}, {}, {:.4}, {:.1}, {:.1}, {:.1}, {:.1}",
          object.category,
          object.subcategory_name(),
          object.confidence,
          object.bbox.x1,
          object.bbox.y1,
          object.bbox.x2,
          object.bbox.y2
        )
      })
      .collect();
    std::fs::write(path.with_extension("txt"), lines.join("\n"))
  }
}

impl Render<RgbImage, CascadeReport> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbImage, result: &CascadeReport) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }

    let path = self.frame_path()?;
    self.draw.annotate(frame, result).save(&path)?;
    if self.record {
      Self::write_record(&path, result)?;
    }
    debug!("保存标注帧: {}", path.display());
    Ok(())
  }
}
