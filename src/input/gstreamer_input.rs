// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入
//!
//! 支持两类视频源：
//!
//! - `gst://file/path/to/video.mp4`：视频文件，经 `decodebin` 解码
//! - `gst://camera/dev/video0?width=1280&height=720&fps=30`：V4L2 摄像头
//!
//! 可选查询参数 `rotate=90|180|270` 旋转画面。输出帧统一转换为 RGB，
//! 帧尺寸由视频源决定。
//!
//! 使用前需要安装 GStreamer 开发库，并启用 `gstreamer_input` 特性。

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, url_path};

const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 15;
const PULL_TIMEOUT_MS: u64 = 100;

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("路径编码错误: {0}")]
  PathEncoding(#[from] std::string::FromUtf8Error),
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("找不到 appsink 元素")]
  AppSinkNotFound,
  #[error("元素无法转换为 appsink")]
  AppSinkConversionFailed,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的视频格式: {0:?}")]
  UnsupportedFormat(gst_video::VideoFormat),
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("状态切换失败: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  VideoFlip {
    method: u32,
  },
  TargetFormat,
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        width,
        height,
        fps,
      } => format!(
        "v4l2src device=\"{}\" ! video/x-raw,width={},height={},framerate={}/1",
        camera, width, height, fps
      ),
      GStreamerInputBuilderItem::VideoFlip { method } => format!("videoflip method={}", method),
      GStreamerInputBuilderItem::TargetFormat => "videoconvert ! video/x-raw,format=RGB".to_string(),
    }
  }
}

pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
}

impl GStreamerInputPipelineBuilder {
  fn parse_query<T: std::str::FromStr>(query: &HashMap<String, String>, key: &str, default: T) -> T {
    query
      .get(key)
      .and_then(|v| v.parse::<T>().ok())
      .unwrap_or(default)
  }

  fn camera(path: &str, query: &HashMap<String, String>) -> Vec<GStreamerInputBuilderItem> {
    vec![GStreamerInputBuilderItem::CameraSource {
      camera: path.to_string(),
      width: Self::parse_query(query, "width", DEFAULT_CAMERA_WIDTH),
      height: Self::parse_query(query, "height", DEFAULT_CAMERA_HEIGHT),
      fps: Self::parse_query(query, "fps", DEFAULT_CAMERA_FPS),
    }]
  }

  fn file(path: &str) -> Vec<GStreamerInputBuilderItem> {
    vec![GStreamerInputBuilderItem::FileSource(path.to_string())]
  }

  fn video_flip(rotate: Option<&str>) -> Option<GStreamerInputBuilderItem> {
    let method = match rotate? {
      "90" => 1,
      "180" => 2,
      "270" => 3,
      _ => return None,
    };
    Some(GStreamerInputBuilderItem::VideoFlip { method })
  }

  pub fn description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    // 逐帧拉取，不丢帧
    format!("{} ! appsink max-buffers=2 sync=false name=sink", basic_pipeline)
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    GStreamerInput::launch(&self.description())
  }
}

impl GStreamerInput {
  /// 启动管道描述，描述中必须包含名为 `sink` 的 appsink
  pub fn launch(description: &str) -> Result<Self, GStreamerInputError> {
    gst::init()?;
    info!("GStreamer 管道: {}", description);

    let pipeline = gst::parse::launch(description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput {
      pipeline,
      appsink,
      finished: false,
    })
  }

  /// 取出总线上的管道错误
  fn pipeline_error(&self) -> Option<String> {
    let message = self.pipeline.bus()?.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
      gst::MessageView::Error(err) => Some(match err.debug() {
        Some(debug) => format!("{} ({})", err.error(), debug),
        None => err.error().to_string(),
      }),
      _ => None,
    }
  }
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != GStreamerInput::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let path = url_path(url)?;
    let path = path.to_string_lossy();
    let mut items = match url.host_str() {
      Some("camera") => Self::camera(&path, &query),
      Some("file") => Self::file(&path),
      _ => return Err(GStreamerInputError::SchemeMismatch),
    };

    if let Some(flip) = Self::video_flip(query.get("rotate").map(String::as_str)) {
      items.push(flip);
    }
    items.push(GStreamerInputBuilderItem::TargetFormat);

    Ok(Self { items })
  }
}

/// GStreamer 视频输入，关闭时停止管道
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  finished: bool,
}

impl FromUrlWithScheme for GStreamerInput {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInput {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    GStreamerInputPipelineBuilder::from_url(url)?.build()
  }
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 管道失败: {}", e);
    }
  }
}

impl Iterator for GStreamerInput {
  type Item = Result<RgbImage, GStreamerInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }
    loop {
      let timeout = gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS);
      if let Some(sample) = self.appsink.try_pull_sample(timeout) {
        return Some(convert_sample(&sample));
      }
      if self.appsink.is_eos() {
        self.finished = true;
        return None;
      }
      // 管道出错后 appsink 既不产出样本也不会到达 EOS
      if let Some(reason) = self.pipeline_error() {
        self.finished = true;
        return Some(Err(GStreamerInputError::PipelineError(reason)));
      }
    }
  }
}

fn convert_sample(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  let (width, height) = (video_info.width(), video_info.height());
  let stride = video_info.stride()[0] as usize;
  let row_bytes = width as usize * 3;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e))
  })?;
  let data = map.as_slice();

  let expected = stride * (height as usize).saturating_sub(1) + row_bytes;
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let bgr = match video_info.format() {
    gst_video::VideoFormat::Rgb => false,
    gst_video::VideoFormat::Bgr => true,
    format => return Err(GStreamerInputError::UnsupportedFormat(format)),
  };

  // 逐行拷贝以去掉行尾对齐填充
  let mut pixels = Vec::with_capacity(row_bytes * height as usize);
  for row in 0..height as usize {
    let line = &data[row * stride..row * stride + row_bytes];
    if bgr {
      for px in line.chunks_exact(3) {
        pixels.extend_from_slice(&[px[2], px[1], px[0]]);
      }
    } else {
      pixels.extend_from_slice(line);
    }
  }

  RgbImage::from_raw(width, height, pixels).ok_or(GStreamerInputError::BufferSizeMismatch {
    expected: row_bytes * height as usize,
    actual: data.len(),
  })
}
