// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 采集、标注、显示任务
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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::{thread, time::Duration, time::Instant};

use image::RgbImage;
use tracing::{debug, error, info, warn};

use crate::{
  detection::DetectionProvider,
  input::{InitError, InitRequest, InputDevice, ReadError},
  output::{AnnotatedDisplaySink, DisplaySurface},
};

/// 依次尝试打开方式，返回第一个成功的
pub fn initialize_first<D: InputDevice + ?Sized>(
  device: &mut D,
  requests: &[InitRequest],
) -> Result<InitRequest, InitError> {
  let mut last_error = InitError::NoRequest;
  for request in requests {
    match device.initialize(*request) {
      Ok(()) => {
        info!(
          "设备以 {:?} 打开: {}x{}",
          request,
          device.width(),
          device.height()
        );
        return Ok(*request);
      }
      Err(e) => {
        warn!("以 {:?} 打开设备失败: {}", request, e);
        last_error = e;
      }
    }
  }
  Err(last_error)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TaskReport {
  pub frames: usize,
  pub detections: usize,
}

/// 持续读取帧直到流结束、收到停止信号或达到指定帧数
#[derive(Debug, Clone)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  max_transient_failures: u32,
  retry_delay: Duration,
  stop: Arc<AtomicBool>,
}

impl Default for ContinuousTask {
  fn default() -> Self {
    Self {
      frame_number: None,
      max_transient_failures: 10,
      retry_delay: Duration::from_millis(100),
      stop: Arc::new(AtomicBool::new(false)),
    }
  }
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_max_transient_failures(mut self, max: u32) -> Self {
    self.max_transient_failures = max;
    self
  }

  pub fn with_retry_delay(mut self, delay: Duration) -> Self {
    self.retry_delay = delay;
    self
  }

  /// 置位后任务在当前帧结束时退出
  pub fn stop_flag(&self) -> Arc<AtomicBool> {
    self.stop.clone()
  }

  pub fn run_task<D, P, S>(
    &self,
    device: &mut D,
    provider: &mut P,
    sink: &mut AnnotatedDisplaySink<S>,
  ) -> anyhow::Result<TaskReport>
  where
    D: InputDevice + ?Sized,
    P: DetectionProvider,
    P::Error: std::error::Error + Send + Sync + 'static,
    S: DisplaySurface,
    S::Error: std::error::Error + Send + Sync + 'static,
  {
    info!("开始任务...");
    let mut report = TaskReport::default();
    let mut buffer = RgbImage::new(device.width(), device.height());
    let mut failures = 0u32;
    let mut now = Instant::now();

    loop {
      if self.stop.load(Ordering::Relaxed) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
      if self.frame_number.is_some_and(|n| report.frames >= n) {
        info!("达到指定帧数 {}, 退出任务循环", report.frames);
        break;
      }

      match device.read(&mut buffer) {
        Ok(()) => failures = 0,
        Err(ReadError::EndOfStream) => {
          info!("输入流结束");
          break;
        }
        Err(e) if e.is_retryable() => {
          failures += 1;
          if failures > self.max_transient_failures {
            error!("连续 {} 次读取失败", failures);
            return Err(e.into());
          }
          warn!("读取失败（第 {} 次），重试: {}", failures, e);
          thread::sleep(self.retry_delay);
          continue;
        }
        Err(e) => {
          error!("设备不可用: {}", e);
          return Err(e.into());
        }
      }

      let results = provider.detect(&buffer)?;
      report.frames += 1;
      report.detections += results.len();
      debug!("第 {} 帧检测到 {} 个目标", report.frames, results.len());

      let elapsed = now.elapsed();
      now = Instant::now();
      let fps = if elapsed.is_zero() {
        0.0
      } else {
        1.0 / elapsed.as_secs_f64()
      };

      sink.feed_frame(std::mem::take(&mut buffer));
      for result in &results {
        sink.prepare_data(result);
      }
      sink.handle_output(&format!("FPS: {:.1}, frame {}", fps, report.frames))?;
      if let Some(frame) = sink.take_frame() {
        buffer = frame;
      }
    }

    info!(
      "任务完成，共 {} 帧，{} 个检测结果",
      report.frames, report.detections
    );
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detection::{DetectionResult, NoDetections, Rect};
  use crate::input::{ConfigError, DeviceConfig, DeviceState};
  use crate::output::Annotator;
  use std::collections::VecDeque;

  /// 按脚本返回读取结果的设备
  struct Scripted {
    state: DeviceState,
    accepts: fn(&InitRequest) -> bool,
    script: VecDeque<Result<(), ReadError>>,
  }

  impl Scripted {
    fn new(script: Vec<Result<(), ReadError>>) -> Self {
      Self {
        state: DeviceState::default(),
        accepts: |_| true,
        script: script.into(),
      }
    }
  }

  impl InputDevice for Scripted {
    fn initialize(&mut self, request: InitRequest) -> Result<(), InitError> {
      self.state.ensure_uninitialized()?;
      if !(self.accepts)(&request) {
        return Err(InitError::Unsupported("scripted"));
      }
      self.state.mark_initialized(32, 24);
      Ok(())
    }

    fn read(&mut self, frame: &mut RgbImage) -> Result<(), ReadError> {
      self.state.ensure_initialized()?;
      let next = self.script.pop_front().unwrap_or(Err(ReadError::EndOfStream));
      if next.is_ok() {
        *frame = RgbImage::new(32, 24);
      }
      next
    }

    fn configure(&mut self, _config: &DeviceConfig) -> Result<(), ConfigError> {
      Ok(())
    }

    fn state(&self) -> &DeviceState {
      &self.state
    }

    fn state_mut(&mut self) -> &mut DeviceState {
      &mut self.state
    }
  }

  #[derive(Default)]
  struct Counter {
    shown: usize,
  }

  impl DisplaySurface for Counter {
    type Error = std::convert::Infallible;

    fn show(&mut self, _window: &str, _frame: &RgbImage) -> Result<(), Self::Error> {
      self.shown += 1;
      Ok(())
    }
  }

  struct OneFace;

  impl DetectionProvider for OneFace {
    type Error = std::convert::Infallible;

    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<DetectionResult>, Self::Error> {
      Ok(vec![
        DetectionResult::new(Rect::new(2, 2, 8, 8), "face").with_confidence(0.7),
      ])
    }
  }

  fn sink() -> AnnotatedDisplaySink<Counter> {
    AnnotatedDisplaySink::new("test", Annotator::new().unwrap(), Counter::default())
  }

  fn quick_task() -> ContinuousTask {
    ContinuousTask::default().with_retry_delay(Duration::ZERO)
  }

  #[test]
  fn first_accepted_request_wins() {
    let mut device = Scripted::new(vec![]);
    device.accepts = |r| matches!(r, InitRequest::Default);
    let chosen = initialize_first(
      &mut device,
      &[InitRequest::ByIndex(3), InitRequest::Default],
    )
    .unwrap();
    assert_eq!(chosen, InitRequest::Default);
    assert!(device.is_initialized());
  }

  #[test]
  fn all_requests_failing_returns_last_error() {
    let mut device = Scripted::new(vec![]);
    device.accepts = |_| false;
    assert!(matches!(
      initialize_first(&mut device, &[InitRequest::Default]),
      Err(InitError::Unsupported(_))
    ));
    assert!(matches!(
      initialize_first(&mut device, &[]),
      Err(InitError::NoRequest)
    ));
    assert!(!device.is_initialized());
  }

  #[test]
  fn runs_until_end_of_stream() {
    let mut device = Scripted::new(vec![Ok(()), Ok(()), Ok(())]);
    initialize_first(&mut device, &[InitRequest::Default]).unwrap();
    let mut sink = sink();

    let report = quick_task()
      .run_task(&mut device, &mut OneFace, &mut sink)
      .unwrap();
    assert_eq!(
      report,
      TaskReport {
        frames: 3,
        detections: 3
      }
    );
    assert_eq!(sink.surface().shown, 3);
  }

  #[test]
  fn transient_failures_are_retried() {
    let mut device = Scripted::new(vec![
      Ok(()),
      Err(ReadError::Transient("busy".into())),
      Err(ReadError::Transient("busy".into())),
      Ok(()),
    ]);
    initialize_first(&mut device, &[InitRequest::Default]).unwrap();

    let report = quick_task()
      .with_max_transient_failures(2)
      .run_task(&mut device, &mut NoDetections, &mut sink())
      .unwrap();
    assert_eq!(report.frames, 2);
  }

  #[test]
  fn too_many_transient_failures_abort() {
    let mut device = Scripted::new(vec![
      Err(ReadError::Transient("busy".into())),
      Err(ReadError::Transient("busy".into())),
    ]);
    initialize_first(&mut device, &[InitRequest::Default]).unwrap();

    let err = quick_task()
      .with_max_transient_failures(1)
      .run_task(&mut device, &mut NoDetections, &mut sink())
      .unwrap_err();
    assert!(matches!(
      err.downcast_ref::<ReadError>(),
      Some(ReadError::Transient(_))
    ));
  }

  #[test]
  fn fatal_failure_aborts_and_uninitialized_device_is_refused() {
    let mut device = Scripted::new(vec![Err(ReadError::Fatal("unplugged".into()))]);
    let err = quick_task()
      .run_task(&mut device, &mut NoDetections, &mut sink())
      .unwrap_err();
    assert!(matches!(
      err.downcast_ref::<ReadError>(),
      Some(ReadError::NotInitialized)
    ));

    initialize_first(&mut device, &[InitRequest::Default]).unwrap();
    let err = quick_task()
      .run_task(&mut device, &mut NoDetections, &mut sink())
      .unwrap_err();
    assert!(matches!(
      err.downcast_ref::<ReadError>(),
      Some(ReadError::Fatal(_))
    ));
  }

  #[test]
  fn frame_limit_and_stop_flag() {
    let mut device = Scripted::new((0..10).map(|_| Ok(())).collect());
    initialize_first(&mut device, &[InitRequest::Default]).unwrap();
    let report = quick_task()
      .with_frame_number(Some(4))
      .run_task(&mut device, &mut NoDetections, &mut sink())
      .unwrap();
    assert_eq!(report.frames, 4);

    let task = quick_task();
    task.stop_flag().store(true, Ordering::Relaxed);
    let report = task
      .run_task(&mut device, &mut NoDetections, &mut sink())
      .unwrap();
    assert_eq!(report.frames, 0);
  }
}
