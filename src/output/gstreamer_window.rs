// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/gstreamer_window.rs - GStreamer 窗口显示
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

//! # GStreamer 窗口显示模块
//!
//! 每个窗口名对应一条 `appsrc ! videoconvert ! <sink>` 管道，
//! 窗口标题通过 title 标签传给视频 sink。
//!
//! ## URL Scheme
//!
//! `window://`，可选参数：
//!
//! - `sink`: 视频 sink 元素，默认 `autovideosink`
//! - `sync`: 是否按时间戳同步显示，默认 `false`
//!
//! ```no_run
//! use shanan_display::{FromUrl, output::GStreamerWindow};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let url = Url::parse("window://?sink=xvimagesink")?;
//! let window = GStreamerWindow::from_url(&url)?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, output::DisplaySurface};

/// GStreamer 窗口输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerWindowError {
  /// URI scheme 不匹配
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

const GSTREAMER_WINDOW_SCHEME: &str = "window";
const DEFAULT_VIDEO_SINK: &str = "autovideosink";

struct WindowPipeline {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  info: gst_video::VideoInfo,
  titled: bool,
}

impl Drop for WindowPipeline {
  fn drop(&mut self) {
    let _ = self.appsrc.end_of_stream();
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer window pipeline: {}", e);
    }
  }
}

fn video_info(width: u32, height: u32) -> Result<gst_video::VideoInfo, GStreamerWindowError> {
  Ok(
    gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, width, height)
      .fps(gst::Fraction::new(0, 1))
      .build()?,
  )
}

/// 按 GStreamer 的行跨度（每行对齐到 4 字节）排布像素
fn frame_bytes(frame: &RgbImage, info: &gst_video::VideoInfo) -> Vec<u8> {
  let row = frame.width() as usize * 3;
  let stride = info.stride()[0] as usize;
  if stride == row {
    return frame.as_raw().clone();
  }

  let mut data = vec![0u8; info.size()];
  for (y, line) in frame.as_raw().chunks_exact(row).enumerate() {
    data[y * stride..y * stride + row].copy_from_slice(line);
  }
  data
}

/// GStreamer 窗口
pub struct GStreamerWindow {
  video_sink: String,
  sync: bool,
  windows: HashMap<String, WindowPipeline>,
}

impl FromUrlWithScheme for GStreamerWindow {
  const SCHEME: &'static str = GSTREAMER_WINDOW_SCHEME;
}

impl FromUrl for GStreamerWindow {
  type Error = GStreamerWindowError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != GSTREAMER_WINDOW_SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        GSTREAMER_WINDOW_SCHEME,
        url.scheme()
      );
      return Err(GStreamerWindowError::SchemeMismatch);
    }

    gst::init()?;

    let query: HashMap<_, _> = url.query_pairs().collect();
    let video_sink = query
      .get("sink")
      .map(|s| s.to_string())
      .unwrap_or_else(|| DEFAULT_VIDEO_SINK.to_string());
    let sync = query
      .get("sync")
      .map(|v| v == "true" || v == "1")
      .unwrap_or(false);

    Ok(GStreamerWindow {
      video_sink,
      sync,
      windows: HashMap::new(),
    })
  }
}

impl GStreamerWindow {
  fn pipeline_description(&self) -> String {
    format!(
      "appsrc name=src is-live=true do-timestamp=true format=time ! videoconvert ! {} sync={}",
      self.video_sink, self.sync
    )
  }

  fn open_window(
    &self,
    window: &str,
    width: u32,
    height: u32,
  ) -> Result<WindowPipeline, GStreamerWindowError> {
    let description = self.pipeline_description();
    info!("Creating window '{}' pipeline: {}", window, description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerWindowError::PipelineError("Failed to create pipeline".to_string()))?;
    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerWindowError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerWindowError::AppSrcNotFound)?;

    let info = video_info(width, height)?;
    appsrc.set_caps(Some(&info.to_caps()?));
    pipeline.set_state(gst::State::Playing)?;

    Ok(WindowPipeline {
      pipeline,
      appsrc,
      info,
      titled: false,
    })
  }

  fn push_frame(entry: &mut WindowPipeline, frame: &RgbImage) -> Result<(), GStreamerWindowError> {
    if (entry.info.width(), entry.info.height()) != frame.dimensions() {
      info!(
        "Window frame size changed {}x{} -> {:?}",
        entry.info.width(),
        entry.info.height(),
        frame.dimensions()
      );
      let info = video_info(frame.width(), frame.height())?;
      entry.appsrc.set_caps(Some(&info.to_caps()?));
      entry.info = info;
    }

    let buffer = gst::Buffer::from_slice(frame_bytes(frame, &entry.info));
    entry.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerWindowError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;
    Ok(())
  }
}

impl DisplaySurface for GStreamerWindow {
  type Error = GStreamerWindowError;

  fn show(&mut self, window: &str, frame: &RgbImage) -> Result<(), Self::Error> {
    if !self.windows.contains_key(window) {
      let entry = self.open_window(window, frame.width(), frame.height())?;
      self.windows.insert(window.to_string(), entry);
    }
    let entry = self
      .windows
      .get_mut(window)
      .ok_or_else(|| GStreamerWindowError::PipelineError(format!("window '{}' lost", window)))?;

    Self::push_frame(entry, frame)?;

    // 标签事件在数据流开始后才有效
    if !entry.titled {
      let mut tags = gst::TagList::new();
      if let Some(tags) = tags.get_mut() {
        tags.add::<gst::tags::Title>(&window, gst::TagMergeMode::Replace);
      }
      if !entry.appsrc.send_event(gst::event::Tag::new(tags)) {
        warn!("Video sink ignored title for window '{}'", window);
      }
      entry.titled = true;
    }
    Ok(())
  }
}
