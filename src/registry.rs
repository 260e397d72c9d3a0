// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/registry.rs - 子分类模型注册表
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
  fmt,
  sync::{Arc, OnceLock},
};

use thiserror::Error;
use tracing::{error, info};

use crate::config::{CategoryEntry, CategoryId, Taxonomy};

/// 某一类别的子分类模型加载失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("类别 {category} 的子分类模型加载失败: {reason}")]
pub struct ModelLoadError {
  pub category: String,
  pub reason: String,
}

impl ModelLoadError {
  pub fn new(category: impl Into<String>, reason: impl fmt::Display) -> Self {
    Self {
      category: category.into(),
      reason: reason.to_string(),
    }
  }
}

pub trait SubclassifierLoader {
  type Model;

  fn load(&self, entry: &CategoryEntry) -> Result<Self::Model, ModelLoadError>;
}

impl<L: SubclassifierLoader + ?Sized> SubclassifierLoader for &L {
  type Model = L::Model;

  fn load(&self, entry: &CategoryEntry) -> Result<Self::Model, ModelLoadError> {
    (**self).load(entry)
  }
}

pub enum Resolved<M> {
  Model(Arc<M>),
  /// 该类别没有子类别，直接使用类别名
  Sentinel,
}

impl<M> Clone for Resolved<M> {
  fn clone(&self) -> Self {
    match self {
      Resolved::Model(model) => Resolved::Model(Arc::clone(model)),
      Resolved::Sentinel => Resolved::Sentinel,
    }
  }
}

impl<M> fmt::Debug for Resolved<M> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Resolved::Model(_) => f.write_str("Resolved::Model"),
      Resolved::Sentinel => f.write_str("Resolved::Sentinel"),
    }
  }
}

type Slot<M> = OnceLock<Result<Arc<M>, ModelLoadError>>;

/// 按类别懒加载并缓存子分类模型
///
/// 每个类别占用一个 `OnceLock` 槽位，首次解析时加载，之后无论成功与否都不会再次加载。
pub struct SubclassifierRegistry<L: SubclassifierLoader> {
  loader: L,
  taxonomy: Arc<Taxonomy>,
  slots: Box<[Slot<L::Model>]>,
}

impl<L: SubclassifierLoader> SubclassifierRegistry<L> {
  pub fn new(loader: L, taxonomy: Arc<Taxonomy>) -> Self {
    let slots = (0..taxonomy.len()).map(|_| OnceLock::new()).collect();
    Self {
      loader,
      taxonomy,
      slots,
    }
  }

  pub fn taxonomy(&self) -> &Taxonomy {
    &self.taxonomy
  }

  pub fn resolve(&self, category: CategoryId) -> Result<Resolved<L::Model>, ModelLoadError> {
    let entry = self
      .taxonomy
      .entry(category)
      .ok_or_else(|| ModelLoadError::new(format!("#{}", category.index()), "未知类别"))?;

    if !entry.has_subclasses() {
      return Ok(Resolved::Sentinel);
    }

    let slot = &self.slots[category.index()];
    let loaded = slot.get_or_init(|| {
      info!("加载类别 {} 的子分类模型", entry.name);
      self.loader.load(entry).map(Arc::new).inspect_err(|e| {
        error!("{}", e);
      })
    });

    loaded.clone().map(Resolved::Model)
  }

  pub fn is_loaded(&self, category: CategoryId) -> bool {
    self
      .slots
      .get(category.index())
      .and_then(OnceLock::get)
      .is_some_and(Result::is_ok)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{CascadeConfig, Preprocess};
  use std::{
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
  };

  struct CountingLoader {
    calls: AtomicUsize,
    fail: bool,
  }

  impl CountingLoader {
    fn new(fail: bool) -> Self {
      Self {
        calls: AtomicUsize::new(0),
        fail,
      }
    }
  }

  impl SubclassifierLoader for CountingLoader {
    type Model = usize;

    fn load(&self, entry: &CategoryEntry) -> Result<usize, ModelLoadError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.fail {
        Err(ModelLoadError::new(&entry.name, "文件不存在"))
      } else {
        Ok(entry.subclasses.len())
      }
    }
  }

  fn taxonomy() -> Arc<Taxonomy> {
    Arc::new(CascadeConfig::builtin().unwrap().taxonomy())
  }

  #[test]
  fn resolve_loads_once_and_reuses_handle() {
    let taxonomy = taxonomy();
    let plastic = taxonomy.id_of("plastic").unwrap();
    let registry = SubclassifierRegistry::new(CountingLoader::new(false), taxonomy);

    assert!(!registry.is_loaded(plastic));
    let Resolved::Model(first) = registry.resolve(plastic).unwrap() else {
      panic!("plastic 应当有子分类模型");
    };
    let Resolved::Model(second) = registry.resolve(plastic).unwrap() else {
      panic!("plastic 应当有子分类模型");
    };

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(*first, 17);
    assert_eq!(registry.loader.calls.load(Ordering::SeqCst), 1);
    assert!(registry.is_loaded(plastic));
  }

  #[test]
  fn category_without_subclasses_is_sentinel() {
    let taxonomy = taxonomy();
    let cans = taxonomy.id_of("cans").unwrap();
    let registry = SubclassifierRegistry::new(CountingLoader::new(false), taxonomy);

    assert!(matches!(registry.resolve(cans), Ok(Resolved::Sentinel)));
    assert_eq!(registry.loader.calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn failed_load_is_cached_and_names_category() {
    let taxonomy = taxonomy();
    let glass = taxonomy.id_of("glass").unwrap();
    let registry = SubclassifierRegistry::new(CountingLoader::new(true), taxonomy);

    let err = registry.resolve(glass).unwrap_err();
    assert_eq!(err.category, "glass");
    assert_eq!(registry.resolve(glass).unwrap_err(), err);
    assert_eq!(registry.loader.calls.load(Ordering::SeqCst), 1);
    assert!(!registry.is_loaded(glass));
  }

  #[test]
  fn concurrent_first_resolve_loads_once() {
    let taxonomy = Arc::new(Taxonomy::new(vec![CategoryEntry {
      name: "glass".to_string(),
      subclasses: vec!["clear".to_string(), "brown".to_string()].into_boxed_slice(),
      checkpoint: Some(PathBuf::from("glass.onnx")),
      preprocess: Preprocess::default(),
    }]));
    let glass = taxonomy.id_at(0).unwrap();
    let registry = SubclassifierRegistry::new(CountingLoader::new(false), taxonomy);

    std::thread::scope(|scope| {
      for _ in 0..8 {
        scope.spawn(|| {
          assert!(matches!(registry.resolve(glass), Ok(Resolved::Model(_))));
        });
      }
    });
    assert_eq!(registry.loader.calls.load(Ordering::SeqCst), 1);
  }
}
