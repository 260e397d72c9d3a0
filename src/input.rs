// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use image::RgbImage;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  stream::{OpenSource, StreamReadError},
};

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError, read_rgb_image};

mod image_sequence;
pub use self::image_sequence::{ImageSequenceInput, ImageSequenceInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("图像序列输入错误: {0}")]
  ImageSequenceInputError(#[from] ImageSequenceInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl From<InputError> for StreamReadError {
  fn from(err: InputError) -> Self {
    StreamReadError::Read(err.to_string())
  }
}

pub enum InputWrapper {
  ReadImageFile(ImageFileInput),
  ImageSequence(ImageSequenceInput),
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ImageFileInput::SCHEME => Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?)),
      ImageSequenceInput::SCHEME => Ok(InputWrapper::ImageSequence(
        ImageSequenceInput::from_url(url)?,
      )),
      #[cfg(feature = "gstreamer_input")]
      GStreamerInput::SCHEME => {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        Ok(InputWrapper::GStreamerInput(input))
      }
      scheme => Err(InputError::SchemeMismatch(scheme.to_string())),
    }
  }
}

impl Iterator for InputWrapper {
  type Item = Result<RgbImage, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::ReadImageFile(input) => input.next().map(|r| r.map_err(InputError::from)),
      InputWrapper::ImageSequence(input) => input.next().map(|r| r.map_err(InputError::from)),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.next().map(|r| r.map_err(InputError::from)),
    }
  }
}

/// 帧流：输入错误统一转换为 [`StreamReadError`]
pub struct FrameStream {
  inner: InputWrapper,
}

impl Iterator for FrameStream {
  type Item = Result<RgbImage, StreamReadError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.inner.next().map(|r| r.map_err(StreamReadError::from))
  }
}

/// 按 URL 打开视频源
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlSourceOpener;

impl OpenSource<Url> for UrlSourceOpener {
  type Stream = FrameStream;

  fn open(&self, source: &Url) -> Result<Self::Stream, StreamReadError> {
    info!("打开视频源: {}", source);
    let inner = InputWrapper::from_url(source).map_err(|e| StreamReadError::Open {
      location: source.to_string(),
      reason: e.to_string(),
    })?;
    Ok(FrameStream { inner })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_scheme_fails_to_open() {
    let url = Url::parse("rtmp://example.com/live").unwrap();
    assert!(matches!(
      UrlSourceOpener.open(&url),
      Err(StreamReadError::Open { .. })
    ));
  }

  #[test]
  fn image_file_yields_single_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.png");
    RgbImage::new(12, 8).save(&path).unwrap();

    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file", "image", 1)).unwrap();
    let mut stream = UrlSourceOpener.open(&url).unwrap();

    assert_eq!(stream.next().unwrap().unwrap().dimensions(), (12, 8));
    assert!(stream.next().is_none());
  }
  #[test]
  fn image_file_with_spaced_chinese_name_opens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("瓶子 1.png");
    RgbImage::new(6, 3).save(&path).unwrap();

    let url = Url::from_file_path(&path).unwrap();
    assert!(url.path().ends_with("%E7%93%B6%E5%AD%90%201.png"));
    let url = Url::parse(&url.as_str().replacen("file", "image", 1)).unwrap();
    let mut stream = UrlSourceOpener.open(&url).unwrap();

    assert_eq!(stream.next().unwrap().unwrap().dimensions(), (6, 3));
  }
}
