// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/bin/classify_stream.rs - 视频流分类
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

use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use huishou::{
  FromUrl,
  cascade::OnnxCascade,
  config::{CascadeConfig, Device},
  input::UrlSourceOpener,
  output::OutputWrapper,
  stream::{DEFAULT_SKIP_RATE, StreamController},
  task::{DEFAULT_INTERVAL_MS, StreamTask, Task},
};

/// 按顺序播放视频源，对采样帧检测并分类
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 级联配置文件，缺省使用内置配置
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
  /// 推理设备，覆盖配置文件中的设置（cpu、cuda、cuda:N）
  #[arg(long, value_name = "DEVICE")]
  pub device: Option<Device>,
  /// 视频源，可重复指定
  #[arg(long, value_name = "SOURCE", required = true)]
  pub input: Vec<Url>,
  /// 每隔多少帧分类一次
  #[arg(long, value_name = "N", default_value_t = DEFAULT_SKIP_RATE)]
  pub skip_rate: u64,
  /// 两次读取之间的间隔（毫秒）
  #[arg(long, value_name = "MS", default_value_t = DEFAULT_INTERVAL_MS)]
  pub interval_ms: u64,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT", default_value = "stdout://")]
  pub output: Url,
  /// 采样帧缩放后的宽度，需同时指定 --frame-height
  #[arg(long, value_name = "WIDTH", requires = "frame_height")]
  pub frame_width: Option<u32>,
  /// 采样帧缩放后的高度，需同时指定 --frame-width
  #[arg(long, value_name = "HEIGHT", requires = "frame_width")]
  pub frame_height: Option<u32>,
  /// 最多分类的帧数
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub max_frames: Option<u64>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let mut config = match &args.config {
    Some(path) => CascadeConfig::from_file(path)?,
    None => CascadeConfig::builtin()?,
  };
  if let Some(device) = args.device {
    config.models.device = device;
  }

  for (index, source) in args.input.iter().enumerate() {
    info!("视频源 {}: {}", index, source);
  }
  info!("输出路径: {}", args.output);

  let cascade = OnnxCascade::from_config(&config)?;
  let output = OutputWrapper::from_url(&args.output)?;
  let frame_size = args.frame_width.zip(args.frame_height);
  if let Some((width, height)) = frame_size {
    info!("采样帧缩放到 {}x{}", width, height);
  }
  let controller = StreamController::new(args.input, UrlSourceOpener, args.skip_rate)
    .with_frame_size(frame_size);

  StreamTask::default()
    .with_interval(Duration::from_millis(args.interval_ms))
    .with_max_frames(args.max_frames)
    .run_task(controller, cascade, output)
}
