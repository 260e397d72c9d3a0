// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/task.rs - 批量图像与视频流任务
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
  error::Error as StdError,
  fmt,
  path::Path,
  sync::mpsc,
  thread,
  time::{Duration, Instant},
};

use image::RgbImage;
use tracing::{error, info, warn};

use crate::{
  cascade::{CascadeReport, ClassificationCascade},
  model::{DetectResult, Logits, Model},
  output::{Render, ResultSink},
  pipeline::{Pipeline, PipelineError},
  registry::SubclassifierLoader,
  stream::{ClassifyFrame, OpenSource, StreamController, Tick},
};

pub const DEFAULT_INTERVAL_MS: u64 = 10;

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 逐个分类图像文件并写入结果存储
///
/// 单张图像读取或检测失败只记录日志并继续，写入存储失败则立即中止。
#[derive(Default, Debug)]
pub struct ImageBatchTask;

impl<I, P, D, C, L, S> Task<I, ClassificationCascade<D, C, L>, S> for ImageBatchTask
where
  I: IntoIterator<Item = P>,
  P: AsRef<Path>,
  D: Model<Input = RgbImage, Output = DetectResult>,
  D::Error: Into<Box<dyn StdError + Send + Sync>>,
  C: Model<Input = RgbImage, Output = Logits>,
  C::Error: fmt::Display,
  L: SubclassifierLoader,
  L::Model: Model<Input = RgbImage, Output = Logits>,
  <L::Model as Model>::Error: fmt::Display,
  S: ResultSink,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: I,
    model: ClassificationCascade<D, C, L>,
    output: S,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let pipeline = Pipeline::new(model, output);

    let (mut images, mut objects, mut failures) = (0usize, 0usize, 0usize);
    for path in input {
      let path = path.as_ref();
      images += 1;
      let now = Instant::now();
      match pipeline.classify_image(path) {
        Ok(report) => {
          objects += report.records.len();
          for record in &report.records {
            info!(
              "{} #{}: {}-{}",
              record.source_name, record.object_id, record.category, record.subcategory
            );
          }
          info!("{} 处理完成，耗时: {:.2?}", report.source_name, now.elapsed());
        }
        Err(e @ PipelineError::Sink(_)) => return Err(e.into()),
        Err(e) => {
          error!("处理 {} 失败: {}", path.display(), e);
          failures += 1;
        }
      }
    }

    info!(
      "任务完成: {} 张图像, {} 个目标, {} 张失败",
      images, objects, failures
    );
    if failures > 0 {
      anyhow::bail!("{} 张图像处理失败", failures);
    }
    Ok(())
  }
}

/// 驱动 [`StreamController`] 逐帧播放
///
/// 每次 tick 之间休眠 `interval`；当前视频源结束后继续播放下一个，打不开的视频源跳过，
/// 最后一个视频源结束、收到中断信号或达到 `max_frames` 个采样帧时退出。
#[derive(Debug)]
pub struct StreamTask {
  interval: Duration,
  max_frames: Option<u64>,
}

impl Default for StreamTask {
  fn default() -> Self {
    Self {
      interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
      max_frames: None,
    }
  }
}

impl StreamTask {
  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }

  pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
    self.max_frames = max_frames;
    self
  }

  /// 运行到结束，不安装中断处理
  pub fn run_until<S, Op, M, R, RE>(
    self,
    mut controller: StreamController<S, Op>,
    model: M,
    output: R,
    interrupted: impl Fn() -> bool,
  ) -> Result<u64, anyhow::Error>
  where
    S: fmt::Display,
    Op: OpenSource<S>,
    M: ClassifyFrame,
    R: Render<RgbImage, CascadeReport, Error = RE>,
    RE: StdError + Send + Sync + 'static,
  {
    if !open_from(&mut controller, 0) {
      warn!("没有可以打开的视频源");
      return Ok(0);
    }

    let mut sampled = 0u64;
    loop {
      match controller.tick(&model) {
        Tick::Idle | Tick::Discarded { .. } => {}
        Tick::Classified {
          frame_count,
          frame,
          report,
        } => {
          sampled += 1;
          info!(
            "第 {} 帧: {} 个目标, 跳过 {} 个",
            frame_count,
            report.objects.len(),
            report.skipped
          );
          output.render_result(&frame, &report)?;
        }
        Tick::Failed { frame_count, error } => {
          warn!("第 {} 帧分类失败: {}", frame_count, error);
        }
        Tick::Ended { error } => {
          if let Some(e) = error {
            warn!("视频源 {} 异常结束: {}", controller.current_index(), e);
          }
          let next = controller.current_index() + 1;
          if !open_from(&mut controller, next) {
            info!("所有视频源播放完毕");
            break;
          }
        }
      }

      if self.max_frames.is_some_and(|n| sampled >= n) {
        info!("达到指定帧数 {}, 退出任务循环", sampled);
        controller.stop();
        break;
      }
      if interrupted() {
        warn!("中断信号接收，退出任务循环");
        controller.stop();
        break;
      }
      thread::sleep(self.interval);
    }

    Ok(sampled)
  }
}

/// 从 `index` 开始依次尝试打开视频源，打不开的只记录日志并跳过
fn open_from<S, Op>(controller: &mut StreamController<S, Op>, index: usize) -> bool
where
  S: fmt::Display,
  Op: OpenSource<S>,
{
  for index in index..controller.source_count() {
    match controller.start(index) {
      Ok(()) => return true,
      Err(e) => warn!("跳过视频源 {}: {}", index, e),
    }
  }
  false
}

impl<S, Op, M, R, RE> Task<StreamController<S, Op>, M, R> for StreamTask
where
  S: fmt::Display,
  Op: OpenSource<S>,
  M: ClassifyFrame,
  R: Render<RgbImage, CascadeReport, Error = RE>,
  RE: StdError + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: StreamController<S, Op>, model: M, output: R) -> Result<(), Self::Error> {
    info!("开始任务, 采样间隔 {} 帧...", input.skip_rate());
    let (tx, rx) = mpsc::channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;

    let sampled = self.run_until(input, model, output, || rx.try_recv().is_ok())?;
    info!("任务完成，共分类 {} 帧", sampled);
    Ok(())
  }
}
