// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 视频/图像输入设备
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

//! # 输入设备
//!
//! 摄像头、视频文件、静态图片统一抽象为 [`InputDevice`]：
//! 先通过某一种 [`InitRequest`] 打开设备，再反复 [`InputDevice::read`] 取帧。
//!
//! ## URL Scheme
//!
//! - `v4l:///dev/video0` - V4L2 摄像头（路径为空时使用 `/dev/video0`）
//! - `video:///path/to/file.mp4` - 视频文件（需要 `gstreamer_input` 特性）
//! - `image:///path/to/file.png` - 静态图片
//!
//! 查询参数：
//!
//! - `index`: 摄像头序号，对应 [`InitRequest::ByIndex`]
//! - `width`, `height`: 期望分辨率，对应 [`InitRequest::WithResolution`]
//! - `fps`, `exposure`, `rotate`, `loop`: 设备配置，见 [`DeviceConfig`]
//!
//! ```no_run
//! use shanan_display::{FromUrl, input::{InputDevice, InputWrapper}};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let url = Url::parse("v4l:///dev/video0?width=640&height=480&fps=30")?;
//! let mut input = InputWrapper::from_url(&url)?;
//! for request in input.init_requests() {
//!     if input.initialize(request).is_ok() {
//!         break;
//!     }
//! }
//! let mut frame = image::RgbImage::new(0, 0);
//! input.read(&mut frame)?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use image::RgbImage;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::FromUrl;
pub use crate::frame::Rotation;

mod image_file;
mod standard_camera;
#[cfg(feature = "gstreamer_input")]
mod video_file;

pub use self::image_file::ImageFile;
pub use self::standard_camera::StandardCamera;
#[cfg(feature = "gstreamer_input")]
pub use self::video_file::VideoFile;

/// 打开设备的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitRequest {
  /// 默认设备或预先配置的文件
  #[default]
  Default,
  /// 按序号选择同类设备中的一个（只对摄像头有意义）
  ByIndex(u32),
  /// 以指定分辨率打开
  WithResolution { width: u32, height: u32 },
}

impl InitRequest {
  pub(crate) fn validate(&self) -> Result<(), InitError> {
    match self {
      InitRequest::WithResolution { width, height } if *width == 0 || *height == 0 => {
        Err(InitError::InvalidResolution {
          width: *width,
          height: *height,
        })
      }
      _ => Ok(()),
    }
  }
}

#[derive(Error, Debug)]
pub enum InitError {
  #[error("Device is already initialized")]
  AlreadyInitialized,
  #[error("Unsupported init request: {0}")]
  Unsupported(&'static str),
  #[error("Invalid resolution {width}x{height}")]
  InvalidResolution { width: u32, height: u32 },
  #[error("No init request to try")]
  NoRequest,
  #[error("Failed to open device: {0}")]
  Open(String),
  #[error("Unsupported pixel format: {0}")]
  UnsupportedFormat(String),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("Configuration error: {0}")]
  Config(#[from] ConfigError),
}

#[derive(Error, Debug)]
pub enum ReadError {
  /// 文件读完，不会再有新帧
  #[error("End of stream")]
  EndOfStream,
  #[error("Device is not initialized")]
  NotInitialized,
  /// 暂时性错误，可以重试
  #[error("Transient read failure: {0}")]
  Transient(String),
  /// 设备不可用，重试没有意义
  #[error("Device failure: {0}")]
  Fatal(String),
}

impl ReadError {
  pub fn is_retryable(&self) -> bool {
    matches!(self, ReadError::Transient(_))
  }
}

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Option '{0}' is not supported by this device")]
  Unsupported(&'static str),
  #[error("Option cannot be changed after initialization")]
  AlreadyInitialized,
  #[error("Invalid value '{value}' for option '{key}'")]
  InvalidValue { key: String, value: String },
  #[error("Device error: {0}")]
  Device(String),
}

/// 设备相关的可调参数，未设置的项保持设备默认值
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceConfig {
  pub fps: Option<u32>,
  pub exposure: Option<i64>,
  pub rotate: Option<Rotation>,
  pub looping: Option<bool>,
}

impl DeviceConfig {
  /// 从 URL 查询参数中解析，无关的键被忽略
  pub fn from_query(query: &HashMap<String, String>) -> Result<Self, ConfigError> {
    fn invalid(key: &str, value: &str) -> ConfigError {
      ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
      }
    }

    let mut config = DeviceConfig::default();
    if let Some(value) = query.get("fps") {
      config.fps = Some(value.parse().map_err(|_| invalid("fps", value))?);
    }
    if let Some(value) = query.get("exposure") {
      config.exposure = Some(value.parse().map_err(|_| invalid("exposure", value))?);
    }
    if let Some(value) = query.get("rotate") {
      let rotation = value
        .parse()
        .ok()
        .and_then(Rotation::from_degrees)
        .ok_or_else(|| invalid("rotate", value))?;
      config.rotate = Some(rotation);
    }
    if let Some(value) = query.get("loop") {
      config.looping = Some(match value.as_str() {
        "1" | "true" | "yes" => true,
        "0" | "false" | "no" => false,
        _ => return Err(invalid("loop", value)),
      });
    }
    Ok(config)
  }
}

/// 每个设备都有的记录：分辨率与初始化状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
  width: u32,
  height: u32,
  initialized: bool,
}

impl DeviceState {
  pub(crate) fn ensure_uninitialized(&self) -> Result<(), InitError> {
    if self.initialized {
      Err(InitError::AlreadyInitialized)
    } else {
      Ok(())
    }
  }

  pub(crate) fn ensure_initialized(&self) -> Result<(), ReadError> {
    if self.initialized {
      Ok(())
    } else {
      Err(ReadError::NotInitialized)
    }
  }

  pub(crate) fn mark_initialized(&mut self, width: u32, height: u32) {
    self.width = width;
    self.height = height;
    self.initialized = true;
  }
}

/// 输入设备
///
/// 状态机只有 未初始化 → 已初始化 两个状态；资源在 `Drop` 时释放。
pub trait InputDevice {
  /// 打开设备。成功后 `is_initialized()` 为真，宽高为实际输出的分辨率。
  fn initialize(&mut self, request: InitRequest) -> Result<(), InitError>;

  /// 读取下一帧到调用方提供的缓冲区，可能阻塞。
  fn read(&mut self, frame: &mut RgbImage) -> Result<(), ReadError>;

  /// 应用设备相关的配置，设备不认识的选项返回 [`ConfigError::Unsupported`]。
  fn configure(&mut self, config: &DeviceConfig) -> Result<(), ConfigError>;

  fn state(&self) -> &DeviceState;

  fn state_mut(&mut self) -> &mut DeviceState;

  fn width(&self) -> u32 {
    self.state().width
  }

  fn set_width(&mut self, width: u32) {
    self.state_mut().width = width;
  }

  fn height(&self) -> u32 {
    self.state().height
  }

  fn set_height(&mut self, height: u32) {
    self.state_mut().height = height;
  }

  fn is_initialized(&self) -> bool {
    self.state().initialized
  }

  fn set_initialized(&mut self, initialized: bool) {
    self.state_mut().initialized = initialized;
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("Invalid query parameter: {0}")]
  InvalidQuery(String),
  #[error("Configuration error: {0}")]
  Config(#[from] ConfigError),
}

pub enum InputWrapper {
  StandardCamera(StandardCamera),
  #[cfg(feature = "gstreamer_input")]
  VideoFile(VideoFile),
  ImageFile(ImageFile),
}

pub(crate) fn query_map(url: &Url) -> HashMap<String, String> {
  url
    .query_pairs()
    .map(|(k, v)| (String::from(k), String::from(v)))
    .collect()
}

/// 从 URL 查询参数中解析打开方式提示与设备配置
pub(crate) fn parse_query(url: &Url) -> Result<(Option<InitRequest>, DeviceConfig), InputError> {
  let query = query_map(url);
  let hint = init_hint(&query)?;
  let config = DeviceConfig::from_query(&query)?;
  Ok((hint, config))
}

/// 从查询参数中读取打开方式提示
fn init_hint(query: &HashMap<String, String>) -> Result<Option<InitRequest>, InputError> {
  let parse = |key: &str| -> Result<Option<u32>, InputError> {
    query
      .get(key)
      .map(|v| {
        v.parse::<u32>()
          .map_err(|_| InputError::InvalidQuery(format!("{}={}", key, v)))
      })
      .transpose()
  };

  if let Some(index) = parse("index")? {
    return Ok(Some(InitRequest::ByIndex(index)));
  }
  match (parse("width")?, parse("height")?) {
    (Some(width), Some(height)) => Ok(Some(InitRequest::WithResolution { width, height })),
    (None, None) => Ok(None),
    _ => Err(InputError::InvalidQuery(
      "width and height must be given together".to_string(),
    )),
  }
}

impl InputWrapper {
  fn device(&self) -> &dyn InputDevice {
    match self {
      InputWrapper::StandardCamera(device) => device,
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::VideoFile(device) => device,
      InputWrapper::ImageFile(device) => device,
    }
  }

  fn device_mut(&mut self) -> &mut dyn InputDevice {
    match self {
      InputWrapper::StandardCamera(device) => device,
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::VideoFile(device) => device,
      InputWrapper::ImageFile(device) => device,
    }
  }

  /// URL 中给出的打开方式在前，`Default` 兜底
  pub fn init_requests(&self) -> Vec<InitRequest> {
    let hint = match self {
      InputWrapper::StandardCamera(device) => device.hint(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::VideoFile(device) => device.hint(),
      InputWrapper::ImageFile(device) => device.hint(),
    };
    let mut requests: Vec<InitRequest> = hint.into_iter().collect();
    if !requests.contains(&InitRequest::Default) {
      requests.push(InitRequest::Default);
    }
    requests
  }
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    let wrapper = match url.scheme() {
      StandardCamera::SCHEME => InputWrapper::StandardCamera(StandardCamera::from_url(url)?),
      #[cfg(feature = "gstreamer_input")]
      VideoFile::SCHEME => InputWrapper::VideoFile(VideoFile::from_url(url)?),
      ImageFile::SCHEME => InputWrapper::ImageFile(ImageFile::from_url(url)?),
      _ => return Err(InputError::SchemeMismatch),
    };

    info!("Input device created from {}", url);
    Ok(wrapper)
  }
}

impl InputDevice for InputWrapper {
  fn initialize(&mut self, request: InitRequest) -> Result<(), InitError> {
    self.device_mut().initialize(request)
  }

  fn read(&mut self, frame: &mut RgbImage) -> Result<(), ReadError> {
    self.device_mut().read(frame)
  }

  fn configure(&mut self, config: &DeviceConfig) -> Result<(), ConfigError> {
    self.device_mut().configure(config)
  }

  fn state(&self) -> &DeviceState {
    self.device().state()
  }

  fn state_mut(&mut self) -> &mut DeviceState {
    self.device_mut().state_mut()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Bare {
    state: DeviceState,
  }

  impl InputDevice for Bare {
    fn initialize(&mut self, request: InitRequest) -> Result<(), InitError> {
      self.state.ensure_uninitialized()?;
      request.validate()?;
      match request {
        InitRequest::WithResolution { width, height } => {
          self.state.mark_initialized(width, height)
        }
        _ => self.state.mark_initialized(320, 240),
      }
      Ok(())
    }

    fn read(&mut self, _frame: &mut RgbImage) -> Result<(), ReadError> {
      self.state.ensure_initialized()
    }

    fn configure(&mut self, _config: &DeviceConfig) -> Result<(), ConfigError> {
      Err(ConfigError::Unsupported("all"))
    }

    fn state(&self) -> &DeviceState {
      &self.state
    }

    fn state_mut(&mut self) -> &mut DeviceState {
      &mut self.state
    }
  }

  fn bare() -> Bare {
    Bare {
      state: DeviceState::default(),
    }
  }

  #[test]
  fn fresh_device_is_not_initialized() {
    let device = bare();
    assert!(!device.is_initialized());
    assert_eq!((device.width(), device.height()), (0, 0));
  }

  #[test]
  fn accessors_round_trip_without_validation() {
    let mut device = bare();
    device.set_width(1920);
    device.set_height(7);
    assert_eq!(device.width(), 1920);
    assert_eq!(device.height(), 7);
    assert!(!device.is_initialized());

    device.set_initialized(true);
    assert!(device.is_initialized());
    device.set_width(0);
    assert_eq!(device.width(), 0);
  }

  #[test]
  fn initialize_populates_state_once() {
    let mut device = bare();
    let mut frame = RgbImage::new(0, 0);
    assert!(matches!(device.read(&mut frame), Err(ReadError::NotInitialized)));

    device
      .initialize(InitRequest::WithResolution {
        width: 640,
        height: 480,
      })
      .unwrap();
    assert!(device.is_initialized());
    assert_eq!((device.width(), device.height()), (640, 480));
    assert!(device.read(&mut frame).is_ok());

    assert!(matches!(
      device.initialize(InitRequest::Default),
      Err(InitError::AlreadyInitialized)
    ));
  }

  #[test]
  fn zero_resolution_is_rejected() {
    let mut device = bare();
    assert!(matches!(
      device.initialize(InitRequest::WithResolution {
        width: 0,
        height: 480
      }),
      Err(InitError::InvalidResolution { .. })
    ));
    assert!(!device.is_initialized());
  }

  #[test]
  fn only_transient_errors_are_retryable() {
    assert!(ReadError::Transient("timeout".into()).is_retryable());
    assert!(!ReadError::EndOfStream.is_retryable());
    assert!(!ReadError::Fatal("gone".into()).is_retryable());
    assert!(!ReadError::NotInitialized.is_retryable());
  }

  #[test]
  fn config_is_parsed_from_query() {
    let url = Url::parse("video:///a.mp4?fps=15&rotate=90&loop=true&exposure=-3").unwrap();
    let config = DeviceConfig::from_query(&query_map(&url)).unwrap();
    assert_eq!(config.fps, Some(15));
    assert_eq!(config.exposure, Some(-3));
    assert_eq!(config.rotate, Some(Rotation::Clockwise90));
    assert_eq!(config.looping, Some(true));

    let url = Url::parse("video:///a.mp4?rotate=45").unwrap();
    assert!(matches!(
      DeviceConfig::from_query(&query_map(&url)),
      Err(ConfigError::InvalidValue { .. })
    ));
  }

  #[test]
  fn init_hint_comes_first() {
    let url = Url::parse("v4l:///dev/video2?width=1280&height=720").unwrap();
    let input = InputWrapper::from_url(&url).unwrap();
    assert_eq!(
      input.init_requests(),
      vec![
        InitRequest::WithResolution {
          width: 1280,
          height: 720
        },
        InitRequest::Default
      ]
    );
    assert!(!input.is_initialized());

    let url = Url::parse("v4l://?index=1").unwrap();
    let input = InputWrapper::from_url(&url).unwrap();
    assert_eq!(
      input.init_requests(),
      vec![InitRequest::ByIndex(1), InitRequest::Default]
    );

    let url = Url::parse("image:///tmp/a.png").unwrap();
    let input = InputWrapper::from_url(&url).unwrap();
    assert_eq!(input.init_requests(), vec![InitRequest::Default]);
  }

  #[test]
  fn bad_urls_are_rejected() {
    let url = Url::parse("ftp:///a.png").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch)
    ));

    let url = Url::parse("image:///a.png?width=10").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::InvalidQuery(_))
    ));

    // 图片不支持 exposure
    let url = Url::parse("image:///a.png?exposure=10").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::Config(ConfigError::Unsupported("exposure")))
    ));
  }
}
