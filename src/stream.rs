// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/stream.rs - 视频流播放控制
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

use std::{error::Error as StdError, fmt};

use image::{RgbImage, imageops::{self, FilterType}};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  cascade::{CascadeReport, ClassificationCascade, DetectionError},
  model::{DetectResult, Logits, Model},
  registry::SubclassifierLoader,
};

pub const DEFAULT_SKIP_RATE: u64 = 10;

/// 视频源读取失败或无法打开，流随之终止
#[derive(Error, Debug)]
pub enum StreamReadError {
  #[error("视频源列表为空")]
  NoSource,
  #[error("打开视频源 {location} 失败: {reason}")]
  Open { location: String, reason: String },
  #[error("读取帧失败: {0}")]
  Read(String),
}

/// 打开一个视频源，得到按到达顺序产出帧的迭代器
pub trait OpenSource<S> {
  type Stream: Iterator<Item = Result<RgbImage, StreamReadError>>;

  fn open(&self, source: &S) -> Result<Self::Stream, StreamReadError>;
}

/// 对单帧执行完整的检测与分类
pub trait ClassifyFrame {
  fn classify_frame(&self, frame: &RgbImage) -> Result<CascadeReport, DetectionError>;
}

impl<T: ClassifyFrame + ?Sized> ClassifyFrame for &T {
  fn classify_frame(&self, frame: &RgbImage) -> Result<CascadeReport, DetectionError> {
    (**self).classify_frame(frame)
  }
}

impl<D, C, L> ClassifyFrame for ClassificationCascade<D, C, L>
where
  D: Model<Input = RgbImage, Output = DetectResult>,
  D::Error: Into<Box<dyn StdError + Send + Sync>>,
  C: Model<Input = RgbImage, Output = Logits>,
  C::Error: fmt::Display,
  L: SubclassifierLoader,
  L::Model: Model<Input = RgbImage, Output = Logits>,
  <L::Model as Model>::Error: fmt::Display,
{
  fn classify_frame(&self, frame: &RgbImage) -> Result<CascadeReport, DetectionError> {
    self.run(frame)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
  Stopped,
  Running,
  Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  Previous,
  Next,
}

/// 一次 tick 的结果
#[derive(Debug)]
pub enum Tick {
  /// 暂停或已停止，没有读取任何帧
  Idle,
  /// 读取了一帧但未被采样
  Discarded { frame_count: u64 },
  Classified {
    frame_count: u64,
    frame: RgbImage,
    report: CascadeReport,
  },
  /// 采样帧的检测失败，流继续
  Failed {
    frame_count: u64,
    error: DetectionError,
  },
  /// 流结束或读取失败，控制器已停止
  Ended { error: Option<StreamReadError> },
}

/// 视频源播放状态机
///
/// 每次 [`tick`](Self::tick) 最多读取一帧，第 `skip_rate` 的整数倍帧交给分类器，
/// 其余帧读取后丢弃。暂停期间不读取帧。
pub struct StreamController<S, O: OpenSource<S>> {
  sources: Vec<S>,
  opener: O,
  current: usize,
  skip_rate: u64,
  state: StreamState,
  frame_count: u64,
  frame_size: Option<(u32, u32)>,
  stream: Option<O::Stream>,
}

impl<S: fmt::Display, O: OpenSource<S>> StreamController<S, O> {
  pub fn new(sources: Vec<S>, opener: O, skip_rate: u64) -> Self {
    Self {
      sources,
      opener,
      current: 0,
      skip_rate: skip_rate.max(1),
      state: StreamState::Stopped,
      frame_count: 0,
      frame_size: None,
      stream: None,
    }
  }

  /// 采样帧在分类前缩放到 `宽 × 高`，`None` 保持原始分辨率
  pub fn with_frame_size(mut self, frame_size: Option<(u32, u32)>) -> Self {
    self.frame_size = frame_size.filter(|&(width, height)| width > 0 && height > 0);
    self
  }

  pub fn frame_size(&self) -> Option<(u32, u32)> {
    self.frame_size
  }

  pub fn state(&self) -> StreamState {
    self.state
  }

  pub fn frame_count(&self) -> u64 {
    self.frame_count
  }

  pub fn skip_rate(&self) -> u64 {
    self.skip_rate
  }

  pub fn current_index(&self) -> usize {
    self.current
  }

  pub fn source_count(&self) -> usize {
    self.sources.len()
  }

  pub fn current_source(&self) -> Option<&S> {
    self.sources.get(self.current)
  }

  /// 打开第 `index` 个视频源并开始播放
  ///
  /// 失败时控制器保持停止状态。
  pub fn start(&mut self, index: usize) -> Result<(), StreamReadError> {
    self.release();
    self.frame_count = 0;

    let source = self.sources.get(index).ok_or(StreamReadError::NoSource)?;
    self.current = index;
    let stream = self.opener.open(source)?;

    info!("开始播放视频源 {}: {}", index, source);
    self.stream = Some(stream);
    self.state = StreamState::Running;
    Ok(())
  }

  pub fn pause(&mut self) {
    if self.state == StreamState::Running {
      debug!("暂停播放");
      self.state = StreamState::Paused;
    }
  }

  pub fn resume(&mut self) {
    if self.state == StreamState::Paused {
      debug!("继续播放");
      self.state = StreamState::Running;
    }
  }

  pub fn toggle_pause(&mut self) {
    match self.state {
      StreamState::Running => self.pause(),
      StreamState::Paused => self.resume(),
      StreamState::Stopped => {}
    }
  }

  /// 切换到相邻的视频源，首尾循环
  pub fn advance(&mut self, direction: Direction) -> Result<(), StreamReadError> {
    let len = self.sources.len();
    if len == 0 {
      self.release();
      return Err(StreamReadError::NoSource);
    }

    let next = match direction {
      Direction::Next => (self.current + 1) % len,
      Direction::Previous => (self.current + len - 1) % len,
    };
    self.start(next)
  }

  pub fn stop(&mut self) {
    self.release();
  }

  fn release(&mut self) {
    if self.stream.take().is_some() {
      debug!("释放视频源 {}", self.current);
    }
    self.state = StreamState::Stopped;
  }

  pub fn tick<C: ClassifyFrame>(&mut self, classifier: &C) -> Tick {
    if self.state != StreamState::Running {
      return Tick::Idle;
    }

    let next = match self.stream.as_mut() {
      Some(stream) => stream.next(),
      None => None,
    };

    let frame = match next {
      Some(Ok(frame)) => frame,
      Some(Err(e)) => {
        warn!("读取帧失败, 停止播放: {}", e);
        self.release();
        return Tick::Ended { error: Some(e) };
      }
      None => {
        info!("视频源 {} 播放结束, 共 {} 帧", self.current, self.frame_count);
        self.release();
        return Tick::Ended { error: None };
      }
    };

    self.frame_count += 1;
    let frame_count = self.frame_count;
    if frame_count % self.skip_rate != 0 {
      return Tick::Discarded { frame_count };
    }

    let frame = match self.frame_size {
      Some((width, height)) if frame.dimensions() != (width, height) => {
        imageops::resize(&frame, width, height, FilterType::Triangle)
      }
      _ => frame,
    };

    match classifier.classify_frame(&frame) {
      Ok(report) => Tick::Classified {
        frame_count,
        frame,
        report,
      },
      Err(error) => {
        warn!("第 {} 帧检测失败: {}", frame_count, error);
        Tick::Failed { frame_count, error }
      }
    }
  }
}
