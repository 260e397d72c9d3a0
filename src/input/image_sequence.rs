// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/input/image_sequence.rs - 图像序列输入
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::read_image_file::{ImageFileInputError, read_rgb_image},
  url_path,
};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum ImageSequenceInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("路径编码错误: {0}")]
  PathEncoding(#[from] std::string::FromUtf8Error),
  #[error("读取目录失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("读取帧 {path} 失败: {source}")]
  FrameError {
    path: PathBuf,
    #[source]
    source: ImageFileInputError,
  },
}

/// 目录中的图像按文件名排序后逐帧读取
pub struct ImageSequenceInput {
  files: std::vec::IntoIter<PathBuf>,
}

impl FromUrlWithScheme for ImageSequenceInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageSequenceInput {
  type Error = ImageSequenceInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ImageSequenceInputError::SchemeMismatch);
    }
    Self::from_dir(url_path(url)?)
  }
}

impl ImageSequenceInput {
  pub fn from_dir(directory: impl AsRef<Path>) -> Result<Self, ImageSequenceInputError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory.as_ref())? {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
      if is_image && path.is_file() {
        files.push(path);
      }
    }
    files.sort();

    debug!(
      "目录 {} 中找到 {} 帧",
      directory.as_ref().display(),
      files.len()
    );
    Ok(Self {
      files: files.into_iter(),
    })
  }

  pub fn remaining(&self) -> usize {
    self.files.len()
  }
}

impl Iterator for ImageSequenceInput {
  type Item = Result<RgbImage, ImageSequenceInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.files.next()?;
    Some(
      read_rgb_image(&path).map_err(|source| ImageSequenceInputError::FrameError { path, source }),
    )
  }
}
