// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/sink.rs - 标注显示输出
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

use image::RgbImage;
use thiserror::Error;
use tracing::warn;

use crate::{
  detection::DetectionResult,
  output::{DisplaySurface, draw::Annotator},
};

#[derive(Error, Debug)]
pub enum SinkError<E> {
  #[error("No frame has been fed")]
  NoFrame,
  #[error("Display surface error: {0}")]
  Surface(E),
}

/// 把检测结果画到当前帧上并显示
///
/// 帧的所有权在 [`feed_frame`](Self::feed_frame) 时转入，标注原地进行，
/// 用 [`take_frame`](Self::take_frame) 取回后可作为下一次读取的缓冲区。
pub struct AnnotatedDisplaySink<S> {
  window: String,
  annotator: Annotator,
  surface: S,
  current_frame: Option<RgbImage>,
}

impl<S: DisplaySurface> AnnotatedDisplaySink<S> {
  pub fn new(window: impl Into<String>, annotator: Annotator, surface: S) -> Self {
    Self {
      window: window.into(),
      annotator,
      surface,
      current_frame: None,
    }
  }

  pub fn window(&self) -> &str {
    &self.window
  }

  pub fn surface(&self) -> &S {
    &self.surface
  }

  /// 替换当前帧，之前的帧被丢弃
  pub fn feed_frame(&mut self, frame: RgbImage) {
    self.current_frame = Some(frame);
  }

  pub fn prepare_data(&mut self, result: &DetectionResult) {
    match self.current_frame.as_mut() {
      Some(frame) => self.annotator.annotate(frame, result),
      None => warn!("Detection result dropped, no frame fed to '{}'", self.window),
    }
  }

  pub fn handle_output(&mut self, overall_text: &str) -> Result<(), SinkError<S::Error>> {
    let frame = self.current_frame.as_mut().ok_or(SinkError::NoFrame)?;
    self.annotator.draw_header(frame, overall_text);
    self
      .surface
      .show(&self.window, frame)
      .map_err(SinkError::Surface)
  }

  pub fn frame(&self) -> Option<&RgbImage> {
    self.current_frame.as_ref()
  }

  pub fn take_frame(&mut self) -> Option<RgbImage> {
    self.current_frame.take()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detection::Rect;
  use crate::frame::black_frame;
  use image::Rgb;

  /// 记录所有显示过的帧
  #[derive(Default)]
  struct Recorder {
    shown: Vec<(String, RgbImage)>,
  }

  impl DisplaySurface for Recorder {
    type Error = std::convert::Infallible;

    fn show(&mut self, window: &str, frame: &RgbImage) -> Result<(), Self::Error> {
      self.shown.push((window.to_string(), frame.clone()));
      Ok(())
    }
  }

  fn sink() -> AnnotatedDisplaySink<Recorder> {
    AnnotatedDisplaySink::new("preview", Annotator::new().unwrap(), Recorder::default())
  }

  #[test]
  fn face_scenario() {
    let mut sink = sink();
    sink.feed_frame(black_frame(100, 100));
    let result = DetectionResult::with_sentinels(Rect::new(10, 10, 20, 20), "face", 0.5, -1.0, -1.0);
    sink.prepare_data(&result);

    let frame = sink.frame().unwrap();
    let gray = Rgb([100, 100, 100]);
    for i in 10..30 {
      assert_eq!(frame.get_pixel(i, 10), &gray);
      assert_eq!(frame.get_pixel(i, 29), &gray);
      assert_eq!(frame.get_pixel(10, i), &gray);
      assert_eq!(frame.get_pixel(29, i), &gray);
    }
    assert_eq!(frame.get_pixel(20, 20), &Rgb([0, 0, 0]));

    // 文字锚点在 (10, -5)，只有下半部分落在画面内
    let red = frame
      .enumerate_pixels()
      .filter(|(_, _, p)| p[0] > 0 && p[1] == 0 && p[2] == 0)
      .collect::<Vec<_>>();
    assert!(!red.is_empty());
    assert!(red.iter().all(|(x, y, _)| *x >= 10 && *y < 15));
  }

  #[test]
  fn later_frame_replaces_earlier() {
    let mut sink = sink();
    sink.feed_frame(RgbImage::from_pixel(8, 8, Rgb([255, 255, 255])));
    sink.feed_frame(black_frame(50, 40));
    sink.prepare_data(&DetectionResult::new(Rect::new(1, 1, 5, 5), "face"));
    sink.handle_output("").unwrap();

    let shown = &sink.surface().shown;
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].0, "preview");
    assert_eq!(shown[0].1.dimensions(), (50, 40));
    assert!(shown[0].1.pixels().all(|p| p != &Rgb([255, 255, 255])));
  }

  #[test]
  fn output_without_frame_fails() {
    let mut sink = sink();
    sink.prepare_data(&DetectionResult::new(Rect::new(1, 1, 5, 5), "face"));
    assert!(matches!(sink.handle_output("x"), Err(SinkError::NoFrame)));
    assert!(sink.surface().shown.is_empty());
  }

  #[test]
  fn header_is_burnt_into_shown_frame() {
    let mut sink = sink();
    sink.feed_frame(black_frame(200, 100));
    sink.handle_output("FPS: 12.0, frame 3").unwrap();

    let taken = sink.take_frame().unwrap();
    assert!(taken.pixels().any(|p| p[2] > 0 && p[0] == 0));
    assert_eq!(&sink.surface().shown[0].1, &taken);
    assert!(sink.frame().is_none());
  }
}
