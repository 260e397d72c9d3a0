// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理会话
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

use std::{path::Path, sync::Mutex};

use ort::{
  execution_providers::CUDAExecutionProvider,
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor,
};
use tracing::{debug, info, warn};

use crate::{
  config::Device,
  frame::NchwTensor,
  model::{ModelError, checkpoint},
};

/// 单输入单输出的 ONNX 会话
///
/// `Session::run` 需要独占访问，因此放在互斥锁之后。
pub struct OnnxSession {
  session: Mutex<Session>,
}

impl OnnxSession {
  pub fn load(location: impl AsRef<Path>, device: &Device) -> Result<Self, ModelError> {
    let path = checkpoint::resolve(location)?;
    debug!(
      "模型文件大小: {:.2} MB",
      std::fs::metadata(&path)?.len() as f64 / (1024.0 * 1024.0)
    );

    let builder = Session::builder()
      .map_err(ModelError::backend)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(ModelError::backend)?;

    if let Device::Cuda(device_id) = device {
      match builder
        .clone()
        .with_execution_providers([CUDAExecutionProvider::default()
          .with_device_id(*device_id)
          .build()])
      {
        Ok(cuda) => match cuda.commit_from_file(&path) {
          Ok(session) => {
            info!("使用 CUDA:{} 加载模型 {}", device_id, path.display());
            return Ok(Self {
              session: Mutex::new(session),
            });
          }
          Err(e) => warn!("CUDA 会话创建失败, 回退到 CPU: {}", e),
        },
        Err(e) => warn!("CUDA 执行后端不可用, 回退到 CPU: {}", e),
      }
    }

    let session = builder
      .commit_from_file(&path)
      .map_err(ModelError::backend)?;
    info!("使用 CPU 加载模型 {}", path.display());

    Ok(Self {
      session: Mutex::new(session),
    })
  }

  /// 执行推理，返回第一个输出的形状与数据
  pub fn run(&self, input: NchwTensor) -> Result<(Vec<usize>, Vec<f32>), ModelError> {
    let shape = input.shape();
    let tensor = Tensor::from_array((shape.to_vec(), input.into_vec()))
      .map_err(ModelError::backend)?;

    let mut session = self.session.lock().map_err(|_| ModelError::Poisoned)?;
    let outputs = session
      .run(ort::inputs![tensor])
      .map_err(ModelError::backend)?;

    let (shape, data) = outputs[0]
      .try_extract_tensor::<f32>()
      .map_err(ModelError::backend)?;
    let shape = shape.iter().map(|&d| d.max(0) as usize).collect();

    Ok((shape, data.to_vec()))
  }
}
