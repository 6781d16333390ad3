// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/video_file.rs - GStreamer 视频文件输入
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

//! # GStreamer 视频文件输入
//!
//! 通过 `filesrc ! decodebin` 解码任意 GStreamer 支持的视频文件，
//! 由 `appsink` 取出 RGB 帧。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## URL Scheme
//!
//! `video:///path/to/file.mp4?loop=true&rotate=90`

use std::path::PathBuf;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{self, ChannelOrder, Rotation},
  input::{
    ConfigError, DeviceConfig, DeviceState, InitError, InitRequest, InputDevice, InputError,
    ReadError, parse_query,
  },
};

const VIDEO_FILE_SCHEME: &str = "video";
/// 单次取帧等待时间，超时视为暂时性错误
const PULL_TIMEOUT_MS: u64 = 2_000;
/// 打开时等待第一帧的时间，解码失败只会在总线上报错
const PREROLL_TIMEOUT_MS: u64 = 5_000;

#[derive(Error, Debug)]
enum PipelineError {
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("Unsupported video format: {0:?}")]
  UnsupportedFormat(gst_video::VideoFormat),
  #[error("Frame error: {0}")]
  FrameError(#[from] frame::FrameError),
}

impl From<PipelineError> for InitError {
  fn from(err: PipelineError) -> Self {
    match err {
      PipelineError::UnsupportedFormat(format) => {
        InitError::UnsupportedFormat(format!("{:?}", format))
      }
      other => InitError::Open(other.to_string()),
    }
  }
}

/// 组成解码管道的元素
#[derive(Debug, Clone, PartialEq, Eq)]
enum PipelineItem {
  FileSource(String),
  VideoFlip(Rotation),
  Rate(u32),
  Scale { width: u32, height: u32 },
  TargetFormat,
}

impl PipelineItem {
  fn to_pipeline(&self) -> String {
    match self {
      PipelineItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin ! videoconvert", path)
      }
      PipelineItem::VideoFlip(rotation) => {
        format!("videoflip method={}", rotation.videoflip_method())
      }
      PipelineItem::Rate(fps) => format!("videorate ! video/x-raw,framerate={}/1", fps),
      PipelineItem::Scale { width, height } => {
        format!("videoscale ! video/x-raw,width={},height={}", width, height)
      }
      PipelineItem::TargetFormat => "videoconvert ! video/x-raw,format=RGB".to_string(),
    }
  }
}

struct OpenPipeline {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl Drop for OpenPipeline {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

/// 视频文件
///
/// 不支持 `InitRequest::ByIndex`。`WithResolution` 在管道中插入缩放，
/// 输出帧精确为请求的尺寸。
pub struct VideoFile {
  path: PathBuf,
  state: DeviceState,
  hint: Option<InitRequest>,
  rotate: Rotation,
  fps: Option<u32>,
  looping: bool,
  pipeline: Option<OpenPipeline>,
}

impl FromUrlWithScheme for VideoFile {
  const SCHEME: &'static str = VIDEO_FILE_SCHEME;
}

impl FromUrl for VideoFile {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != VIDEO_FILE_SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        VIDEO_FILE_SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch);
    }

    let (hint, config) = parse_query(url)?;
    let mut video = VideoFile::new(crate::decode_url_path(url));
    video.hint = hint;
    video.configure(&config)?;
    Ok(video)
  }
}

impl VideoFile {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      state: DeviceState::default(),
      hint: None,
      rotate: Rotation::None,
      fps: None,
      looping: false,
      pipeline: None,
    }
  }

  pub(crate) fn hint(&self) -> Option<InitRequest> {
    self.hint
  }

  fn pipeline_items(&self, request: InitRequest) -> Vec<PipelineItem> {
    let mut items = vec![PipelineItem::FileSource(
      self.path.to_string_lossy().into_owned(),
    )];
    if self.rotate != Rotation::None {
      items.push(PipelineItem::VideoFlip(self.rotate));
    }
    if let Some(fps) = self.fps {
      items.push(PipelineItem::Rate(fps));
    }
    if let InitRequest::WithResolution { width, height } = request {
      items.push(PipelineItem::Scale { width, height });
    }
    items.push(PipelineItem::TargetFormat);
    items
  }

  fn open(&self, request: InitRequest) -> Result<(OpenPipeline, u32, u32), PipelineError> {
    gst::init()?;

    let description = format!(
      "{} ! appsink name=sink sync=false max-buffers=2",
      self
        .pipeline_items(request)
        .iter()
        .map(PipelineItem::to_pipeline)
        .collect::<Vec<_>>()
        .join(" ! ")
    );
    info!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| PipelineError::PipelineError("Failed to create pipeline".to_string()))?;
    let appsink = pipeline
      .by_name("sink")
      .ok_or(PipelineError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| PipelineError::AppSinkNotFound)?;

    let opened = OpenPipeline { pipeline, appsink };
    opened.pipeline.set_state(gst::State::Playing)?;

    // 预滚动得到第一帧的 caps，从而得知输出分辨率
    let preroll = opened
      .appsink
      .try_pull_preroll(gst::ClockTime::from_mseconds(PREROLL_TIMEOUT_MS))
      .ok_or_else(|| {
        let reason = Self::bus_error(&opened.pipeline)
          .unwrap_or_else(|| "no frame decoded before timeout".to_string());
        error!("Failed to preroll {}: {}", self.path.display(), reason);
        PipelineError::PipelineError(reason)
      })?;
    let caps = preroll
      .caps()
      .ok_or_else(|| PipelineError::PipelineError("No caps in preroll sample".to_string()))?;
    let info = gst_video::VideoInfo::from_caps(caps)?;
    if info.format() != gst_video::VideoFormat::Rgb {
      return Err(PipelineError::UnsupportedFormat(info.format()));
    }

    Ok((opened, info.width(), info.height()))
  }

  /// 检查总线上的错误消息，出错即为不可恢复
  fn bus_error(pipeline: &gst::Pipeline) -> Option<String> {
    let bus = pipeline.bus()?;
    let message = bus.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
      gst::MessageView::Error(err) => Some(format!(
        "{} ({:?})",
        err.error(),
        err.debug().map(|d| d.to_string())
      )),
      _ => None,
    }
  }
}

fn sample_to_rgb(sample: &gst::Sample) -> Result<RgbImage, PipelineError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| PipelineError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| PipelineError::PipelineError("No caps in sample".to_string()))?;
  let info = gst_video::VideoInfo::from_caps(caps)?;

  let order = match info.format() {
    gst_video::VideoFormat::Rgb => ChannelOrder::Rgb,
    gst_video::VideoFormat::Bgr => ChannelOrder::Bgr,
    other => return Err(PipelineError::UnsupportedFormat(other)),
  };

  let map = buffer.map_readable().map_err(|e| {
    PipelineError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let stride = info.stride()[0] as usize;
  Ok(frame::packed_to_rgb(
    map.as_slice(),
    info.width(),
    info.height(),
    stride,
    order,
  )?)
}

impl InputDevice for VideoFile {
  fn initialize(&mut self, request: InitRequest) -> Result<(), InitError> {
    self.state.ensure_uninitialized()?;
    request.validate()?;
    if let InitRequest::ByIndex(_) = request {
      return Err(InitError::Unsupported(
        "video files cannot be selected by index",
      ));
    }

    let (pipeline, width, height) = self.open(request)?;
    self.pipeline = Some(pipeline);
    self.state.mark_initialized(width, height);
    info!(
      "Video file {} opened: {}x{}",
      self.path.display(),
      width,
      height
    );
    Ok(())
  }

  fn read(&mut self, frame: &mut RgbImage) -> Result<(), ReadError> {
    self.state.ensure_initialized()?;
    let opened = self.pipeline.as_ref().ok_or(ReadError::NotInitialized)?;

    loop {
      if let Some(message) = Self::bus_error(&opened.pipeline) {
        return Err(ReadError::Fatal(message));
      }

      match opened
        .appsink
        .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
      {
        Some(sample) => {
          *frame = sample_to_rgb(&sample).map_err(|e| ReadError::Transient(e.to_string()))?;
          return Ok(());
        }
        None if opened.appsink.is_eos() => {
          if !self.looping {
            return Err(ReadError::EndOfStream);
          }
          debug!("Rewinding {}", self.path.display());
          opened
            .pipeline
            .seek_simple(
              gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
              gst::ClockTime::ZERO,
            )
            .map_err(|e| ReadError::Fatal(format!("Failed to rewind: {}", e)))?;
        }
        None => return Err(ReadError::Transient("timed out waiting for frame".to_string())),
      }
    }
  }

  fn configure(&mut self, config: &DeviceConfig) -> Result<(), ConfigError> {
    if config.exposure.is_some() {
      return Err(ConfigError::Unsupported("exposure"));
    }
    // 旋转与帧率改变管道结构，只能在打开前设置
    if (config.rotate.is_some() || config.fps.is_some()) && self.state.initialized {
      return Err(ConfigError::AlreadyInitialized);
    }

    if let Some(rotate) = config.rotate {
      self.rotate = rotate;
    }
    if config.fps.is_some() {
      self.fps = config.fps;
    }
    if let Some(looping) = config.looping {
      self.looping = looping;
    }
    Ok(())
  }

  fn state(&self) -> &DeviceState {
    &self.state
  }

  fn state_mut(&mut self) -> &mut DeviceState {
    &mut self.state
  }
}
