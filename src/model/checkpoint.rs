// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/model/checkpoint.rs - 模型文件定位
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
  time::SystemTime,
};

use thiserror::Error;
use tracing::debug;

pub const CHECKPOINT_EXTENSION: &str = "onnx";

#[derive(Error, Debug)]
pub enum CheckpointError {
  #[error("模型路径不存在: {0}")]
  NotFound(PathBuf),
  #[error("目录中没有模型文件: {0}")]
  EmptyDirectory(PathBuf),
  #[error("读取模型路径失败: {0}")]
  IoError(#[from] std::io::Error),
}

/// 解析模型位置
///
/// 文件直接返回；目录则返回其中修改时间最新的 `.onnx` 文件。
pub fn resolve(location: impl AsRef<Path>) -> Result<PathBuf, CheckpointError> {
  let location = location.as_ref();
  let metadata = match std::fs::metadata(location) {
    Ok(metadata) => metadata,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
      return Err(CheckpointError::NotFound(location.to_path_buf()));
    }
    Err(e) => return Err(e.into()),
  };

  if metadata.is_file() {
    return Ok(location.to_path_buf());
  }

  let mut newest: Option<(SystemTime, PathBuf)> = None;
  for entry in std::fs::read_dir(location)? {
    let entry = entry?;
    let path = entry.path();
    if path.extension().and_then(|ext| ext.to_str()) != Some(CHECKPOINT_EXTENSION) {
      continue;
    }
    let metadata = entry.metadata()?;
    if !metadata.is_file() {
      continue;
    }
    let modified = metadata.modified()?;
    match &newest {
      Some((time, _)) if *time >= modified => {}
      _ => newest = Some((modified, path)),
    }
  }

  let (_, path) = newest.ok_or_else(|| CheckpointError::EmptyDirectory(location.to_path_buf()))?;
  debug!("目录 {} 解析为模型文件 {}", location.display(), path.display());
  Ok(path)
}
