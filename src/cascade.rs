// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/cascade.rs - 检测与两级分类级联
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

use std::{error::Error as StdError, fmt, sync::Arc};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  config::{CategoryId, Taxonomy, Thresholds},
  model::{BBox, DetectResult, Detection, Logits, Model},
  registry::{ModelLoadError, Resolved, SubclassifierLoader, SubclassifierRegistry},
};

/// 检测器本身调用失败，整张图像的处理随之中止
#[derive(Error, Debug)]
#[error("检测失败: {0}")]
pub struct DetectionError(#[source] pub Box<dyn StdError + Send + Sync>);

impl DetectionError {
  pub fn new(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
    Self(err.into())
  }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("边界框 ({:.1}, {:.1}, {:.1}, {:.1}) 在 {width}x{height} 图像内面积为零", .bbox.x1, .bbox.y1, .bbox.x2, .bbox.y2)]
pub struct CropError {
  pub bbox: BBox,
  pub width: u32,
  pub height: u32,
}

/// 单个检测目标的分类失败，只影响该目标
#[derive(Error, Debug)]
pub enum ClassifyError {
  #[error(transparent)]
  Crop(#[from] CropError),
  #[error("类别分类失败: {0}")]
  Category(String),
  #[error("类别预测 {index:?} 超出类别表 ({len} 个)")]
  CategoryOutOfRange { index: Option<usize>, len: usize },
  #[error(transparent)]
  Load(#[from] ModelLoadError),
  #[error("类别 {category} 的子分类失败: {reason}")]
  Subcategory { category: String, reason: String },
  #[error("类别 {category} 的子分类输出 {actual} 维, 期望 {expected} 维")]
  LogitsLength {
    category: String,
    expected: usize,
    actual: usize,
  },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subcategory {
  Label(String),
  /// 类别没有子类别
  Sentinel,
}

/// 单个目标的完整分类结果
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedObject {
  pub bbox: BBox,
  pub confidence: f32,
  pub category_id: CategoryId,
  pub category: String,
  pub subcategory: Subcategory,
}

impl ClassifiedObject {
  /// 子类别名；无子类别时使用类别名本身
  pub fn subcategory_name(&self) -> &str {
    match &self.subcategory {
      Subcategory::Label(label) => label,
      Subcategory::Sentinel => &self.category,
    }
  }
}

impl fmt::Display for ClassifiedObject {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}-{} ({:.2})",
      self.category,
      self.subcategory_name(),
      self.confidence
    )
  }
}

#[derive(Debug, Clone, Default)]
pub struct CascadeReport {
  pub objects: Vec<ClassifiedObject>,
  /// 处理失败而被跳过的检测数量，不含置信度过滤掉的
  pub skipped: usize,
}

impl CascadeReport {
  pub fn is_empty(&self) -> bool {
    self.objects.is_empty()
  }

  /// 按置信度取前 `n` 个目标
  pub fn top(&self, n: usize) -> Vec<&ClassifiedObject> {
    let mut objects: Vec<_> = self.objects.iter().collect();
    objects.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    objects.truncate(n);
    objects
  }
}

pub struct ClassificationCascade<D, C, L: SubclassifierLoader> {
  detector: D,
  classifier: C,
  registry: SubclassifierRegistry<L>,
  acceptance: f32,
}

impl<D, C, L> ClassificationCascade<D, C, L>
where
  D: Model<Input = RgbImage, Output = DetectResult>,
  D::Error: Into<Box<dyn StdError + Send + Sync>>,
  C: Model<Input = RgbImage, Output = Logits>,
  C::Error: fmt::Display,
  L: SubclassifierLoader,
  L::Model: Model<Input = RgbImage, Output = Logits>,
  <L::Model as Model>::Error: fmt::Display,
{
  pub fn new(
    detector: D,
    classifier: C,
    loader: L,
    taxonomy: Arc<Taxonomy>,
    thresholds: &Thresholds,
  ) -> Self {
    Self {
      detector,
      classifier,
      registry: SubclassifierRegistry::new(loader, taxonomy),
      acceptance: thresholds.acceptance,
    }
  }

  pub fn taxonomy(&self) -> &Taxonomy {
    self.registry.taxonomy()
  }

  pub fn registry(&self) -> &SubclassifierRegistry<L> {
    &self.registry
  }

  /// 检测并分类一张图像
  pub fn run(&self, image: &RgbImage) -> Result<CascadeReport, DetectionError> {
    let detections = self.detector.infer(image).map_err(DetectionError::new)?;
    debug!("检测器返回 {} 个候选目标", detections.len());
    Ok(self.classify_detections(image, &detections.items))
  }

  /// 对已有检测结果逐个分类；单个目标失败不会影响其余目标
  pub fn classify_detections(&self, image: &RgbImage, detections: &[Detection]) -> CascadeReport {
    let mut report = CascadeReport::default();

    for detection in detections {
      if detection.confidence.is_nan() || detection.confidence < self.acceptance {
        debug!(
          "置信度 {:.2} 低于阈值 {:.2}, 忽略",
          detection.confidence, self.acceptance
        );
        continue;
      }

      match self.classify_one(image, detection) {
        Ok(object) => {
          debug!("分类结果: {}", object);
          report.objects.push(object);
        }
        Err(e) => {
          warn!("跳过检测目标 {:?}: {}", detection.bbox, e);
          report.skipped += 1;
        }
      }
    }

    report
  }

  fn classify_one(
    &self,
    image: &RgbImage,
    detection: &Detection,
  ) -> Result<ClassifiedObject, ClassifyError> {
    let (width, height) = image.dimensions();
    let rect = detection
      .bbox
      .clamp_to(width, height)
      .ok_or(CropError {
        bbox: detection.bbox,
        width,
        height,
      })?;
    let crop = image::imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image();

    let taxonomy = self.registry.taxonomy();
    let logits = self
      .classifier
      .infer(&crop)
      .map_err(|e| ClassifyError::Category(e.to_string()))?;
    let index = logits.argmax();
    let (category_id, entry) = index
      .and_then(|i| taxonomy.id_at(i))
      .and_then(|id| taxonomy.entry(id).map(|entry| (id, entry)))
      .ok_or(ClassifyError::CategoryOutOfRange {
        index,
        len: taxonomy.len(),
      })?;

    let subcategory = match self.registry.resolve(category_id)? {
      Resolved::Sentinel => Subcategory::Sentinel,
      Resolved::Model(model) => {
        let logits = model.infer(&crop).map_err(|e| ClassifyError::Subcategory {
          category: entry.name.clone(),
          reason: e.to_string(),
        })?;
        if logits.len() != entry.subclasses.len() {
          return Err(ClassifyError::LogitsLength {
            category: entry.name.clone(),
            expected: entry.subclasses.len(),
            actual: logits.len(),
          });
        }
        let label = logits
          .argmax()
          .and_then(|i| entry.subclasses.get(i))
          .ok_or_else(|| ClassifyError::Subcategory {
            category: entry.name.clone(),
            reason: "输出全部为 NaN".to_string(),
          })?;
        Subcategory::Label(label.clone())
      }
    };

    Ok(ClassifiedObject {
      bbox: rect.to_bbox(),
      confidence: detection.confidence,
      category_id,
      category: entry.name.clone(),
      subcategory,
    })
  }
}

#[cfg(feature = "onnx")]
mod onnx {
  use std::sync::Arc;

  use tracing::info;

  use super::ClassificationCascade;
  use crate::{
    config::CascadeConfig,
    model::{ModelError, OnnxClassifier, OnnxSubclassifierLoader, YoloDetector},
  };

  pub type OnnxCascade = ClassificationCascade<YoloDetector, OnnxClassifier, OnnxSubclassifierLoader>;

  impl OnnxCascade {
    /// 加载检测器与类别分类器；子分类模型在首次使用时加载
    pub fn from_config(config: &CascadeConfig) -> Result<Self, ModelError> {
      let models = &config.models;
      info!("初始化级联模型, 设备: {}", models.device);

      let detector = YoloDetector::load(
        &models.detector,
        &models.device,
        models.detector_input,
        &config.thresholds,
      )?;
      let classifier = OnnxClassifier::load(
        &models.category,
        &models.device,
        models.preprocess.clone(),
      )?;
      let loader = OnnxSubclassifierLoader::new(models.device);

      Ok(Self::new(
        detector,
        classifier,
        loader,
        Arc::new(config.taxonomy()),
        &config.thresholds,
      ))
    }
  }
}

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxCascade;

#[cfg(test)]
mod tests {
  use std::cell::Cell;

  use super::*;
  use crate::{
    config::{CascadeConfig, CategoryEntry},
    model::ModelError,
  };

  struct FixedDetector(Vec<Detection>);

  impl Model for FixedDetector {
    type Input = RgbImage;
    type Output = DetectResult;
    type Error = ModelError;

    fn infer(&self, _input: &RgbImage) -> Result<DetectResult, ModelError> {
      Ok(self.0.clone().into())
    }
  }

  /// 根据裁剪宽度选择类别，便于构造不同目标
  struct WidthClassifier;

  impl Model for WidthClassifier {
    type Input = RgbImage;
    type Output = Logits;
    type Error = ModelError;

    fn infer(&self, input: &RgbImage) -> Result<Logits, ModelError> {
      let mut logits = vec![0.0f32; 5];
      match input.width() {
        w if w < 20 => logits[0] = 1.0,
        w if w < 40 => logits[4] = 1.0,
        w if w < 60 => return Err(ModelError::Backend("推理失败".to_string())),
        w if w >= 90 => logits[3] = 1.0,
        _ => return Ok(Logits::from([vec![0.0f32; 9], vec![5.0]].concat())),
      }
      Ok(logits.into())
    }
  }

  struct FirstLabel;

  impl Model for FirstLabel {
    type Input = RgbImage;
    type Output = Logits;
    type Error = ModelError;

    fn infer(&self, _input: &RgbImage) -> Result<Logits, ModelError> {
      let mut logits = vec![0.0f32; 17];
      logits[2] = 3.0;
      Ok(logits.into())
    }
  }

  struct Loader;

  impl SubclassifierLoader for Loader {
    type Model = FirstLabel;

    fn load(&self, _entry: &CategoryEntry) -> Result<FirstLabel, ModelLoadError> {
      Ok(FirstLabel)
    }
  }

  fn det(x1: f32, x2: f32, confidence: f32) -> Detection {
    Detection {
      bbox: BBox::new(x1, 0.0, x2, 30.0),
      confidence,
    }
  }

  /// `len` 个输出中最后一个得分最高
  struct LastOf(usize);

  impl Model for LastOf {
    type Input = RgbImage;
    type Output = Logits;
    type Error = ModelError;

    fn infer(&self, _input: &RgbImage) -> Result<Logits, ModelError> {
      let mut logits = vec![0.0f32; self.0];
      if let Some(last) = logits.last_mut() {
        *last = 1.0;
      }
      Ok(logits.into())
    }
  }

  /// `fail` 类别加载失败，`short` 类别的模型只输出 3 个值
  #[derive(Default)]
  struct ScriptedLoader {
    fail: Option<&'static str>,
    short: Option<&'static str>,
    loads: Cell<usize>,
  }

  impl SubclassifierLoader for ScriptedLoader {
    type Model = LastOf;

    fn load(&self, entry: &CategoryEntry) -> Result<LastOf, ModelLoadError> {
      self.loads.set(self.loads.get() + 1);
      let name = Some(entry.name.as_str());
      if self.fail == name {
        return Err(ModelLoadError::new(entry.name.clone(), "检查点不存在"));
      }
      if self.short == name {
        return Ok(LastOf(3));
      }
      Ok(LastOf(entry.subclasses.len()))
    }
  }

  fn cascade_with<L>(
    detections: Vec<Detection>,
    loader: L,
  ) -> ClassificationCascade<FixedDetector, WidthClassifier, L>
  where
    L: SubclassifierLoader,
    L::Model: Model<Input = RgbImage, Output = Logits>,
    <L::Model as Model>::Error: fmt::Display,
  {
    let config = CascadeConfig::builtin().unwrap();
    ClassificationCascade::new(
      FixedDetector(detections),
      WidthClassifier,
      loader,
      Arc::new(config.taxonomy()),
      &config.thresholds,
    )
  }

  fn cascade(detections: Vec<Detection>) -> ClassificationCascade<FixedDetector, WidthClassifier, Loader> {
    cascade_with(detections, Loader)
  }

  fn labels(report: &CascadeReport) -> Vec<(&str, &str)> {
    report
      .objects
      .iter()
      .map(|object| (object.category.as_str(), object.subcategory_name()))
      .collect()
  }

  #[test]
  fn low_confidence_is_filtered_not_skipped() {
    let report = cascade(vec![det(0.0, 10.0, 0.6), det(0.0, 10.0, 0.3)])
      .run(&RgbImage::new(100, 50))
      .unwrap();
    assert_eq!(report.objects.len(), 1);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.objects[0].category, "cans");
    assert_eq!(report.objects[0].subcategory, Subcategory::Sentinel);
    assert_eq!(report.objects[0].subcategory_name(), "cans");
  }

  #[test]
  fn subcategory_comes_from_category_labels() {
    let report = cascade(vec![det(0.0, 30.0, 0.9)])
      .run(&RgbImage::new(100, 50))
      .unwrap();
    let object = &report.objects[0];
    assert_eq!(object.category, "plastic");
    assert_eq!(object.subcategory_name(), "bottle-blue5l-full");
    assert_eq!(object.to_string(), "plastic-bottle-blue5l-full (0.90)");
  }

  #[test]
  fn failing_detection_does_not_abort_others() {
    let report = cascade(vec![
      det(0.0, 50.0, 0.9),    // 分类器报错
      det(0.0, 80.0, 0.8),    // 类别下标越界
      det(120.0, 160.0, 0.7), // 完全在图像外
      det(0.0, 10.0, 0.5),
    ])
    .run(&RgbImage::new(100, 50))
    .unwrap();
    assert_eq!(report.objects.len(), 1);
    assert_eq!(report.skipped, 3);
  }

  #[test]
  fn emitted_boxes_stay_inside_image() {
    let report = cascade(vec![Detection {
      bbox: BBox::new(-5.0, -5.0, 12.0, 80.0),
      confidence: 0.95,
    }])
    .run(&RgbImage::new(100, 50))
    .unwrap();
    let bbox = report.objects[0].bbox;
    assert!(bbox.x1 >= 0.0 && bbox.y1 >= 0.0);
    assert!(bbox.x2 < 100.0 && bbox.y2 < 50.0);
    assert!(bbox.area() > 0.0);
  }

  #[test]
  fn top_orders_by_confidence() {
    let report = cascade(vec![det(0.0, 10.0, 0.5), det(20.0, 30.0, 0.9), det(40.0, 50.0, 0.7)])
      .run(&RgbImage::new(100, 50))
      .unwrap();
    let top = report.top(2);
    assert_eq!(top.len(), 2);
    assert_eq!(top[0].confidence, 0.9);
    assert_eq!(top[1].confidence, 0.7);
  }

  #[test]
  fn failed_subclassifier_load_skips_only_that_category() {
    let loader = ScriptedLoader {
      fail: Some("plastic"),
      ..Default::default()
    };
    let cascade = cascade_with(
      vec![det(0.0, 10.0, 0.9), det(0.0, 30.0, 0.8), det(0.0, 95.0, 0.7)],
      &loader,
    );
    let image = RgbImage::new(100, 50);

    let report = cascade.run(&image).unwrap();
    assert_eq!(labels(&report), [("cans", "cans"), ("glass", "glass-transp")]);
    assert_eq!(report.skipped, 1);
    assert_eq!(loader.loads.get(), 2);

    let report = cascade.run(&image).unwrap();
    assert_eq!(report.objects.len(), 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(loader.loads.get(), 2);

    let taxonomy = cascade.taxonomy();
    assert!(!cascade.registry().is_loaded(taxonomy.id_of("plastic").unwrap()));
    assert!(cascade.registry().is_loaded(taxonomy.id_of("glass").unwrap()));
  }

  #[test]
  fn logits_length_mismatch_skips_only_that_detection() {
    let loader = ScriptedLoader {
      short: Some("plastic"),
      ..Default::default()
    };
    let plastic = det(0.0, 30.0, 0.8);
    let cascade = cascade_with(vec![det(0.0, 10.0, 0.9), plastic, det(0.0, 95.0, 0.7)], &loader);
    let image = RgbImage::new(100, 50);

    let report = cascade.run(&image).unwrap();
    assert_eq!(labels(&report), [("cans", "cans"), ("glass", "glass-transp")]);
    assert_eq!(report.skipped, 1);

    assert!(matches!(
      cascade.classify_one(&image, &plastic),
      Err(ClassifyError::LogitsLength {
        expected: 17,
        actual: 3,
        ..
      })
    ));
    let plastic_id = cascade.taxonomy().id_of("plastic").unwrap();
    assert!(cascade.registry().is_loaded(plastic_id));
    assert_eq!(loader.loads.get(), 2);
  }
}
