// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/standard_camera.rs - V4L2 摄像头输入
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

use std::io;

use image::RgbImage;
use tracing::{error, info, warn};
use url::Url;
use v4l::buffer::Type;
use v4l::control::{Control, Value};
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::video::capture::Parameters;
use v4l::{Format, FourCC};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{self, ChannelOrder},
  input::{
    ConfigError, DeviceConfig, DeviceState, InitError, InitRequest, InputDevice, InputError,
    ReadError, parse_query,
  },
};

const V4L_SCHEME: &str = "v4l";
const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

// V4L2_CID_EXPOSURE_ABSOLUTE
const EXPOSURE_ABSOLUTE_CID: u32 = 0x009a_0902;
// 设备被拔出
const ENODEV: i32 = 19;

/// 摄像头能直接转换的像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
  Yuyv,
  Rgb3,
  Bgr3,
}

impl PixelFormat {
  fn from_fourcc(fourcc: FourCC) -> Option<Self> {
    match &fourcc.repr {
      b"YUYV" => Some(PixelFormat::Yuyv),
      b"RGB3" => Some(PixelFormat::Rgb3),
      b"BGR3" => Some(PixelFormat::Bgr3),
      _ => None,
    }
  }

  fn convert(&self, data: &[u8], format: &Format) -> Result<RgbImage, frame::FrameError> {
    match self {
      PixelFormat::Yuyv => frame::yuyv_to_rgb(
        data,
        format.width,
        format.height,
        format.stride as usize,
      ),
      PixelFormat::Rgb3 => frame::packed_to_rgb(
        data,
        format.width,
        format.height,
        format.stride as usize,
        ChannelOrder::Rgb,
      ),
      PixelFormat::Bgr3 => frame::packed_to_rgb(
        data,
        format.width,
        format.height,
        format.stride as usize,
        ChannelOrder::Bgr,
      ),
    }
  }
}

struct OpenCamera {
  // 先于 device 释放
  stream: Stream<'static>,
  device: Device,
  format: Format,
  pixel_format: PixelFormat,
}

/// V4L2 摄像头
///
/// `InitRequest::ByIndex(n)` 打开 `/dev/video{n}`，其余方式打开构造时给出的
/// 设备路径（默认 `/dev/video0`）。请求的分辨率不被支持时接受驱动给出的最近格式。
pub struct StandardCamera {
  path: Option<String>,
  state: DeviceState,
  hint: Option<InitRequest>,
  config: DeviceConfig,
  camera: Option<OpenCamera>,
}

impl FromUrlWithScheme for StandardCamera {
  const SCHEME: &'static str = V4L_SCHEME;
}

impl FromUrl for StandardCamera {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != V4L_SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        V4L_SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch);
    }

    // v4l:///dev/video0 或 v4l://?index=1
    let path = crate::decode_url_path(url);
    let path = if path.is_empty() || path == "/" {
      None
    } else {
      Some(path)
    };

    let (hint, config) = parse_query(url)?;
    let mut camera = StandardCamera::new(path);
    camera.hint = hint;
    camera.configure(&config)?;
    Ok(camera)
  }
}

impl StandardCamera {
  pub fn new(path: Option<String>) -> Self {
    Self {
      path,
      state: DeviceState::default(),
      hint: None,
      config: DeviceConfig::default(),
      camera: None,
    }
  }

  pub(crate) fn hint(&self) -> Option<InitRequest> {
    self.hint
  }

  pub fn device_path(&self) -> &str {
    self.path.as_deref().unwrap_or(DEFAULT_DEVICE)
  }

  fn open(&self, request: InitRequest) -> Result<OpenCamera, InitError> {
    let (device, name) = match request {
      InitRequest::ByIndex(index) => (
        Device::new(index as usize),
        format!("/dev/video{}", index),
      ),
      _ => (
        Device::with_path(self.device_path()),
        self.device_path().to_string(),
      ),
    };
    let device = device.map_err(|e| InitError::Open(format!("{}: {}", name, e)))?;

    let (width, height) = match request {
      InitRequest::WithResolution { width, height } => (width, height),
      _ => (DEFAULT_WIDTH, DEFAULT_HEIGHT),
    };

    let mut format = device
      .format()
      .map_err(|e| InitError::Open(format!("{}: {}", name, e)))?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = match device.set_format(&format) {
      Ok(format) => format,
      Err(e) => {
        warn!("Failed to set format on {}: {}", name, e);
        device
          .format()
          .map_err(|e| InitError::Open(format!("{}: {}", name, e)))?
      }
    };

    if (format.width, format.height) != (width, height) {
      warn!(
        "{} granted {}x{} instead of requested {}x{}",
        name, format.width, format.height, width, height
      );
    }

    let pixel_format = PixelFormat::from_fourcc(format.fourcc)
      .ok_or_else(|| InitError::UnsupportedFormat(format.fourcc.to_string()))?;

    apply_config(&device, &self.config).map_err(InitError::Config)?;

    // Stream 持有设备句柄的引用计数，不借用 device 本身
    let stream = Stream::with_buffers(&device, Type::VideoCapture, STREAM_BUFFERS)
      .map_err(|e| InitError::Open(format!("{}: {}", name, e)))?;

    info!(
      "Camera {} opened: {}x{} {}",
      name, format.width, format.height, format.fourcc
    );

    Ok(OpenCamera {
      stream,
      device,
      format,
      pixel_format,
    })
  }
}

fn apply_config(device: &Device, config: &DeviceConfig) -> Result<(), ConfigError> {
  if let Some(fps) = config.fps {
    device
      .set_params(&Parameters::with_fps(fps))
      .map_err(|e| ConfigError::Device(format!("fps {}: {}", fps, e)))?;
  }
  if let Some(exposure) = config.exposure {
    device
      .set_control(Control {
        id: EXPOSURE_ABSOLUTE_CID,
        value: Value::Integer(exposure),
      })
      .map_err(|e| ConfigError::Device(format!("exposure {}: {}", exposure, e)))?;
  }
  Ok(())
}

fn classify_read_error(error: io::Error) -> ReadError {
  match error.kind() {
    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut => {
      ReadError::Transient(error.to_string())
    }
    _ if error.raw_os_error() == Some(ENODEV) => ReadError::Fatal(error.to_string()),
    io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
      ReadError::Fatal(error.to_string())
    }
    _ => ReadError::Transient(error.to_string()),
  }
}

impl InputDevice for StandardCamera {
  fn initialize(&mut self, request: InitRequest) -> Result<(), InitError> {
    self.state.ensure_uninitialized()?;
    request.validate()?;

    let camera = self.open(request)?;
    self
      .state
      .mark_initialized(camera.format.width, camera.format.height);
    self.camera = Some(camera);
    Ok(())
  }

  fn read(&mut self, frame: &mut RgbImage) -> Result<(), ReadError> {
    self.state.ensure_initialized()?;
    let camera = self.camera.as_mut().ok_or(ReadError::NotInitialized)?;

    let (buffer, _meta) = camera.stream.next().map_err(classify_read_error)?;
    let image = camera
      .pixel_format
      .convert(buffer, &camera.format)
      .map_err(|e| ReadError::Transient(e.to_string()))?;
    *frame = image;
    Ok(())
  }

  fn configure(&mut self, config: &DeviceConfig) -> Result<(), ConfigError> {
    if config.rotate.is_some() {
      return Err(ConfigError::Unsupported("rotate"));
    }
    if config.looping.is_some() {
      return Err(ConfigError::Unsupported("loop"));
    }

    if let Some(camera) = self.camera.as_ref() {
      apply_config(&camera.device, config)?;
    }
    if config.fps.is_some() {
      self.config.fps = config.fps;
    }
    if config.exposure.is_some() {
      self.config.exposure = config.exposure;
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
