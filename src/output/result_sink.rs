// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/output/result_sink.rs - 分类结果持久化
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
  borrow::Cow,
  fs::OpenOptions,
  io::Write,
  path::{Path, PathBuf},
  sync::{Arc, Mutex},
};

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, info};

use crate::cascade::ClassifiedObject;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const CSV_HEADER: [&str; 5] = ["timestamp", "source_name", "object_id", "category", "subcategory"];

#[derive(Error, Debug)]
pub enum SinkError {
  #[error("结果文件 I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("结果存储锁已损坏")]
  Poisoned,
}

/// 持久化的一行分类结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationRecord {
  pub timestamp: NaiveDateTime,
  pub source_name: String,
  /// 同一来源内从 1 开始编号
  pub object_id: usize,
  pub category: String,
  pub subcategory: String,
}

impl ClassificationRecord {
  pub fn from_object(
    timestamp: NaiveDateTime,
    source_name: impl Into<String>,
    object_id: usize,
    object: &ClassifiedObject,
  ) -> Self {
    Self {
      timestamp,
      source_name: source_name.into(),
      object_id,
      category: object.category.clone(),
      subcategory: object.subcategory_name().to_string(),
    }
  }

  pub fn fields(&self) -> [String; 5] {
    [
      self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
      self.source_name.clone(),
      self.object_id.to_string(),
      self.category.clone(),
      self.subcategory.clone(),
    ]
  }
}

/// 只追加的结果存储
pub trait ResultSink {
  fn append(&self, record: &ClassificationRecord) -> Result<(), SinkError>;
}

impl<S: ResultSink + ?Sized> ResultSink for &S {
  fn append(&self, record: &ClassificationRecord) -> Result<(), SinkError> {
    (**self).append(record)
  }
}

impl<S: ResultSink + ?Sized> ResultSink for Box<S> {
  fn append(&self, record: &ClassificationRecord) -> Result<(), SinkError> {
    (**self).append(record)
  }
}

impl<S: ResultSink + ?Sized> ResultSink for Arc<S> {
  fn append(&self, record: &ClassificationRecord) -> Result<(), SinkError> {
    (**self).append(record)
  }
}

fn escape_field(field: &str) -> Cow<'_, str> {
  if field.contains([',', '"', '\n', '\r']) {
    Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
  } else {
    Cow::Borrowed(field)
  }
}

fn csv_line<S: AsRef<str>>(fields: &[S]) -> String {
  let mut line = fields
    .iter()
    .map(|f| escape_field(f.as_ref()))
    .collect::<Vec<_>>()
    .join(",");
  line.push('\n');
  line
}

/// CSV 文件存储，文件不存在或为空时先写入表头
pub struct CsvResultSink {
  path: PathBuf,
  lock: Mutex<()>,
}

impl CsvResultSink {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    info!("分类结果写入 {}", path.display());
    Self {
      path,
      lock: Mutex::new(()),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl ResultSink for CsvResultSink {
  fn append(&self, record: &ClassificationRecord) -> Result<(), SinkError> {
    let _guard = self.lock.lock().map_err(|_| SinkError::Poisoned)?;

    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)?;

    let mut content = String::new();
    if file.metadata()?.len() == 0 {
      debug!("创建结果文件表头: {}", self.path.display());
      content.push_str(&csv_line(&CSV_HEADER));
    }
    content.push_str(&csv_line(&record.fields()));
    file.write_all(content.as_bytes())?;

    Ok(())
  }
}

/// 内存存储，用于测试和嵌入调用
#[derive(Default)]
pub struct MemoryResultSink {
  records: Mutex<Vec<ClassificationRecord>>,
}

impl MemoryResultSink {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn records(&self) -> Vec<ClassificationRecord> {
    self
      .records
      .lock()
      .map(|records| records.clone())
      .unwrap_or_default()
  }

  pub fn len(&self) -> usize {
    self.records.lock().map(|r| r.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl ResultSink for MemoryResultSink {
  fn append(&self, record: &ClassificationRecord) -> Result<(), SinkError> {
    self
      .records
      .lock()
      .map_err(|_| SinkError::Poisoned)?
      .push(record.clone());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::NaiveDate;

  fn record(object_id: usize, subcategory: &str) -> ClassificationRecord {
    ClassificationRecord {
      timestamp: NaiveDate::from_ymd_opt(2026, 3, 14)
        .unwrap()
        .and_hms_opt(9, 26, 53)
        .unwrap(),
      source_name: "bin_01.jpg".to_string(),
      object_id,
      category: "glass".to_string(),
      subcategory: subcategory.to_string(),
    }
  }

  #[test]
  fn header_then_rows() {
    let dir = tempfile::tempdir().unwrap();
    let sink = CsvResultSink::new(dir.path().join("results.csv"));
    sink.append(&record(1, "green")).unwrap();
    sink.append(&record(2, "brown")).unwrap();

    let content = std::fs::read_to_string(sink.path()).unwrap();
    assert_eq!(
      content,
      "timestamp,source_name,object_id,category,subcategory\n\
       2026-03-14 09:26:53,bin_01.jpg,1,glass,green\n\
       2026-03-14 09:26:53,bin_01.jpg,2,glass,brown\n"
    );
  }

  #[test]
  fn fields_with_separators_are_quoted() {
    assert_eq!(escape_field("plain"), "plain");
    assert_eq!(escape_field("a,b"), "\"a,b\"");
    assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
  }

  #[test]
  fn memory_sink_keeps_order() {
    let sink = MemoryResultSink::new();
    let shared: &dyn ResultSink = &sink;
    shared.append(&record(1, "green")).unwrap();
    shared.append(&record(2, "clear")).unwrap();
    let ids: Vec<_> = sink.records().iter().map(|r| r.object_id).collect();
    assert_eq!(ids, [1, 2]);
  }
}
