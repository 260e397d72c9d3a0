// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/bin/classify_image.rs - 图像文件分类
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use huishou::{
  cascade::OnnxCascade,
  config::{CascadeConfig, Device},
  output::CsvResultSink,
  task::{ImageBatchTask, Task},
};

/// 检测图像中的可回收物并分类，结果追加到 CSV 文件
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 级联配置文件，缺省使用内置配置
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
  /// 结果 CSV 文件
  #[arg(long, value_name = "STORE", default_value = "results.csv")]
  pub store: PathBuf,
  /// 推理设备，覆盖配置文件中的设置（cpu、cuda、cuda:N）
  #[arg(long, value_name = "DEVICE")]
  pub device: Option<Device>,
  /// 待分类的图像文件
  #[arg(value_name = "IMAGES", required = true)]
  pub images: Vec<PathBuf>,
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

  info!("检测模型: {}", config.models.detector.display());
  info!("类别模型: {}", config.models.category.display());
  info!("结果文件: {}", args.store.display());

  let cascade = OnnxCascade::from_config(&config)?;
  let sink = CsvResultSink::new(&args.store);

  ImageBatchTask.run_task(args.images, cascade, sink)
}
