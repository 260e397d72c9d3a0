// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/config.rs - 级联配置
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

//! # 级联配置
//!
//! 配置文件为 TOML 格式，描述类别枚举、各类别的子类别枚举、模型路径、
//! 阈值以及各模型的输入预处理参数。`categories` 数组的顺序必须与类别
//! 分类模型输出的顺序一致；`subclasses.<类别>.labels` 的顺序必须与对应
//! 子分类模型输出的顺序一致。
//!
//! ```toml
//! categories = ["cans", "glass"]
//!
//! [models]
//! detector = "models/yolo/best.onnx"
//! category = "models/cnn_1"
//!
//! [subclasses.glass]
//! labels = ["glass-dark", "glass-green", "glass-transp"]
//! checkpoint = "models/cnn_2/glass"
//! ```
//!
//! 没有 `subclasses` 条目（或标签为空）的类别不再细分，子类别使用哨兵值。

use std::{
  collections::{BTreeMap, HashSet},
  fmt,
  path::{Path, PathBuf},
  str::FromStr,
};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

const BUILTIN_CASCADE: &str = include_str!("../labels/cascade.toml");

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

const DEFAULT_DETECTOR_INPUT: u32 = 640;
const DEFAULT_CLASSIFIER_SIZE: u32 = 224;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置解析错误: {0}")]
  ParseError(#[from] toml::de::Error),
  #[error("类别列表为空")]
  NoCategories,
  #[error("类别重复: {0}")]
  DuplicateCategory(String),
  #[error("子类别配置引用了未知类别: {0}")]
  UnknownCategory(String),
  #[error("类别 {category} 的子类别重复: {label}")]
  DuplicateSubclass { category: String, label: String },
  #[error("类别 {0} 配置了子类别但没有模型路径")]
  MissingCheckpoint(String),
  #[error("阈值 {name} 超出范围 [0, 1]: {value}")]
  ThresholdOutOfRange { name: &'static str, value: f32 },
  #[error("预处理尺寸无效: {0}x{1}")]
  InvalidPreprocess(u32, u32),
  #[error("无效的设备: {0}")]
  InvalidDevice(String),
}

/// 检测与筛选阈值
///
/// 检测器内部使用较低的置信度以保证召回，级联再以更严格的
/// `acceptance` 阈值筛选需要分类和持久化的检测。
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Thresholds {
  pub detector_confidence: f32,
  pub detector_iou: f32,
  pub acceptance: f32,
}

impl Default for Thresholds {
  fn default() -> Self {
    Self {
      detector_confidence: 0.2,
      detector_iou: 0.5,
      acceptance: 0.4,
    }
  }
}

/// 推理设备提示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Device {
  #[default]
  Cpu,
  Cuda(i32),
}

impl FromStr for Device {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "cpu" => Ok(Device::Cpu),
      "cuda" | "gpu" => Ok(Device::Cuda(0)),
      other => other
        .strip_prefix("cuda:")
        .and_then(|id| id.parse::<i32>().ok())
        .filter(|id| *id >= 0)
        .map(Device::Cuda)
        .ok_or_else(|| ConfigError::InvalidDevice(s.to_string())),
    }
  }
}

impl TryFrom<String> for Device {
  type Error = ConfigError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cpu => write!(f, "cpu"),
      Device::Cuda(id) => write!(f, "cuda:{}", id),
    }
  }
}

/// 分类模型的输入预处理
///
/// `resize_shorter` 存在时先按短边等比缩放再中心裁剪到 `size`，
/// 否则直接缩放到 `size`。`size` 为 `[宽, 高]`。
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Preprocess {
  pub size: [u32; 2],
  #[serde(default)]
  pub resize_shorter: Option<u32>,
  #[serde(default = "imagenet_mean")]
  pub mean: [f32; 3],
  #[serde(default = "imagenet_std")]
  pub std: [f32; 3],
}

fn imagenet_mean() -> [f32; 3] {
  IMAGENET_MEAN
}

fn imagenet_std() -> [f32; 3] {
  IMAGENET_STD
}

fn default_detector_input() -> u32 {
  DEFAULT_DETECTOR_INPUT
}

impl Default for Preprocess {
  fn default() -> Self {
    Self {
      size: [DEFAULT_CLASSIFIER_SIZE, DEFAULT_CLASSIFIER_SIZE],
      resize_shorter: None,
      mean: IMAGENET_MEAN,
      std: IMAGENET_STD,
    }
  }
}

impl Preprocess {
  pub fn width(&self) -> u32 {
    self.size[0]
  }

  pub fn height(&self) -> u32 {
    self.size[1]
  }

  fn validate(&self) -> Result<(), ConfigError> {
    let [w, h] = self.size;
    if w == 0 || h == 0 || self.std.iter().any(|s| *s <= 0.0) {
      return Err(ConfigError::InvalidPreprocess(w, h));
    }
    if let Some(shorter) = self.resize_shorter
      && shorter < w.min(h)
    {
      return Err(ConfigError::InvalidPreprocess(w, h));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelPaths {
  pub detector: PathBuf,
  pub category: PathBuf,
  #[serde(default)]
  pub device: Device,
  #[serde(default = "default_detector_input")]
  pub detector_input: u32,
  #[serde(default)]
  pub preprocess: Preprocess,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubclassConfig {
  #[serde(default)]
  pub labels: Vec<String>,
  #[serde(default)]
  pub checkpoint: Option<PathBuf>,
  #[serde(default)]
  pub preprocess: Option<Preprocess>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CascadeConfig {
  pub categories: Vec<String>,
  #[serde(default)]
  pub thresholds: Thresholds,
  pub models: ModelPaths,
  #[serde(default)]
  pub subclasses: BTreeMap<String, SubclassConfig>,
}

impl CascadeConfig {
  /// 内置配置，与训练数据的类别划分一致
  pub fn builtin() -> Result<Self, ConfigError> {
    Self::from_toml_str(BUILTIN_CASCADE)
  }

  pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
    let config: CascadeConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("加载级联配置: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    Self::from_toml_str(&content)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.categories.is_empty() {
      return Err(ConfigError::NoCategories);
    }

    let mut seen = HashSet::new();
    for name in &self.categories {
      if !seen.insert(name.as_str()) {
        return Err(ConfigError::DuplicateCategory(name.clone()));
      }
    }

    for (name, sub) in &self.subclasses {
      if !seen.contains(name.as_str()) {
        return Err(ConfigError::UnknownCategory(name.clone()));
      }
      let mut labels = HashSet::new();
      for label in &sub.labels {
        if !labels.insert(label.as_str()) {
          return Err(ConfigError::DuplicateSubclass {
            category: name.clone(),
            label: label.clone(),
          });
        }
      }
      if !sub.labels.is_empty() && sub.checkpoint.is_none() {
        return Err(ConfigError::MissingCheckpoint(name.clone()));
      }
      if let Some(preprocess) = &sub.preprocess {
        preprocess.validate()?;
      }
    }

    let Thresholds {
      detector_confidence,
      detector_iou,
      acceptance,
    } = self.thresholds;
    for (name, value) in [
      ("detector_confidence", detector_confidence),
      ("detector_iou", detector_iou),
      ("acceptance", acceptance),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::ThresholdOutOfRange { name, value });
      }
    }

    if self.models.detector_input == 0 {
      return Err(ConfigError::InvalidPreprocess(0, 0));
    }
    self.models.preprocess.validate()?;

    debug!(
      "级联配置校验通过: {} 个类别, {} 个子分类配置",
      self.categories.len(),
      self.subclasses.len()
    );
    Ok(())
  }

  /// 构建按索引访问的类别表
  pub fn taxonomy(&self) -> Taxonomy {
    let entries = self
      .categories
      .iter()
      .map(|name| {
        let sub = self.subclasses.get(name);
        CategoryEntry {
          name: name.clone(),
          subclasses: sub
            .map(|s| s.labels.clone().into_boxed_slice())
            .unwrap_or_default(),
          checkpoint: sub.and_then(|s| s.checkpoint.clone()),
          preprocess: sub
            .and_then(|s| s.preprocess.clone())
            .unwrap_or_else(|| self.models.preprocess.clone()),
        }
      })
      .collect();
    Taxonomy::new(entries)
  }
}

/// 类别在 `categories` 中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CategoryId(usize);

impl CategoryId {
  pub fn index(self) -> usize {
    self.0
  }
}

#[derive(Debug, Clone)]
pub struct CategoryEntry {
  pub name: String,
  pub subclasses: Box<[String]>,
  pub checkpoint: Option<PathBuf>,
  pub preprocess: Preprocess,
}

impl CategoryEntry {
  pub fn has_subclasses(&self) -> bool {
    !self.subclasses.is_empty()
  }
}

/// 固定大小的类别表，类别与子类别都通过索引访问
#[derive(Debug, Clone)]
pub struct Taxonomy {
  categories: Box<[CategoryEntry]>,
}

impl Taxonomy {
  pub fn new(categories: Vec<CategoryEntry>) -> Self {
    Self {
      categories: categories.into_boxed_slice(),
    }
  }

  pub fn len(&self) -> usize {
    self.categories.len()
  }

  pub fn is_empty(&self) -> bool {
    self.categories.is_empty()
  }

  pub fn id_at(&self, index: usize) -> Option<CategoryId> {
    (index < self.categories.len()).then_some(CategoryId(index))
  }

  pub fn id_of(&self, name: &str) -> Option<CategoryId> {
    self
      .categories
      .iter()
      .position(|entry| entry.name == name)
      .map(CategoryId)
  }

  pub fn entry(&self, id: CategoryId) -> Option<&CategoryEntry> {
    self.categories.get(id.0)
  }

  pub fn iter(&self) -> impl Iterator<Item = (CategoryId, &CategoryEntry)> {
    self
      .categories
      .iter()
      .enumerate()
      .map(|(i, entry)| (CategoryId(i), entry))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const MINIMAL: &str = r#"
    categories = ["cans", "glass"]

    [models]
    detector = "det.onnx"
    category = "cat.onnx"

    [subclasses.glass]
    labels = ["glass-dark", "glass-green"]
    checkpoint = "glass.onnx"
  "#;

  #[test]
  fn builtin_config_matches_training_labels() {
    let config = CascadeConfig::builtin().unwrap();
    assert_eq!(
      config.categories,
      ["cans", "cardboard", "detergent", "glass", "plastic"]
    );
    assert_eq!(config.thresholds, Thresholds::default());

    let taxonomy = config.taxonomy();
    let plastic = taxonomy.entry(taxonomy.id_of("plastic").unwrap()).unwrap();
    assert_eq!(plastic.subclasses.len(), 17);
    assert_eq!(plastic.preprocess.size, [384, 384]);

    let cardboard = taxonomy.entry(taxonomy.id_of("cardboard").unwrap()).unwrap();
    assert_eq!(cardboard.preprocess.resize_shorter, Some(420));

    let cans = taxonomy.entry(taxonomy.id_of("cans").unwrap()).unwrap();
    assert!(!cans.has_subclasses());
    assert!(cans.checkpoint.is_none());
  }

  #[test]
  fn categories_without_subclasses_inherit_category_preprocess() {
    let config = CascadeConfig::from_toml_str(MINIMAL).unwrap();
    let taxonomy = config.taxonomy();
    let cans = taxonomy.entry(taxonomy.id_of("cans").unwrap()).unwrap();
    assert_eq!(cans.preprocess, Preprocess::default());
    assert_eq!(config.models.device, Device::Cpu);
    assert_eq!(config.models.detector_input, 640);
  }

  #[test]
  fn rejects_subclasses_of_unknown_category() {
    let content = format!(
      "{}\n[subclasses.metal]\nlabels = [\"a\"]\ncheckpoint = \"m.onnx\"\n",
      MINIMAL
    );
    let err = CascadeConfig::from_toml_str(&content).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownCategory(name) if name == "metal"));
  }

  #[test]
  fn rejects_subclasses_without_checkpoint() {
    let content = r#"
      categories = ["glass"]
      [models]
      detector = "det.onnx"
      category = "cat.onnx"
      [subclasses.glass]
      labels = ["glass-dark"]
    "#;
    let err = CascadeConfig::from_toml_str(content).unwrap_err();
    assert!(matches!(err, ConfigError::MissingCheckpoint(name) if name == "glass"));
  }

  #[test]
  fn rejects_duplicate_categories_and_bad_thresholds() {
    let dup = MINIMAL.replace("[\"cans\", \"glass\"]", "[\"cans\", \"cans\", \"glass\"]");
    assert!(matches!(
      CascadeConfig::from_toml_str(&dup),
      Err(ConfigError::DuplicateCategory(_))
    ));

    let bad = format!("{}\n[thresholds]\nacceptance = 1.5\n", MINIMAL);
    assert!(matches!(
      CascadeConfig::from_toml_str(&bad),
      Err(ConfigError::ThresholdOutOfRange {
        name: "acceptance",
        ..
      })
    ));
  }

  #[test]
  fn parses_device_hints() {
    assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
    assert_eq!("CUDA".parse::<Device>().unwrap(), Device::Cuda(0));
    assert_eq!("cuda:2".parse::<Device>().unwrap(), Device::Cuda(2));
    assert!("tpu".parse::<Device>().is_err());
    assert!("cuda:-1".parse::<Device>().is_err());
    assert_eq!(Device::Cuda(1).to_string(), "cuda:1");
  }
}
