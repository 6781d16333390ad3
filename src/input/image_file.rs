// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/image_file.rs - 图像文件输入
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

use std::path::PathBuf;

use image::{ImageReader, RgbImage, imageops::FilterType};
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Rotation,
  input::{
    ConfigError, DeviceConfig, DeviceState, InitError, InitRequest, InputDevice, InputError,
    ReadError, parse_query,
  },
};

const READ_IMAGE_FILE_SCHEME: &str = "image";

/// 把一张静态图片当作帧源
///
/// 默认只产出一帧，随后返回 [`ReadError::EndOfStream`]；
/// 配置 `looping` 后每次读取都返回同一张图片。
pub struct ImageFile {
  path: PathBuf,
  state: DeviceState,
  image: Option<RgbImage>,
  hint: Option<InitRequest>,
  rotate: Rotation,
  looping: bool,
  served: bool,
}

impl FromUrlWithScheme for ImageFile {
  const SCHEME: &'static str = READ_IMAGE_FILE_SCHEME;
}

impl FromUrl for ImageFile {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch);
    }

    let (hint, config) = parse_query(url)?;
    let mut device = ImageFile::new(crate::decode_url_path(url));
    device.hint = hint;
    device.configure(&config)?;
    Ok(device)
  }
}

impl ImageFile {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      state: DeviceState::default(),
      image: None,
      hint: None,
      rotate: Rotation::None,
      looping: false,
      served: false,
    }
  }

  pub(crate) fn hint(&self) -> Option<InitRequest> {
    self.hint
  }

  fn load(&self) -> Result<RgbImage, InitError> {
    let image = ImageReader::open(&self.path)
      .map_err(|e| InitError::Open(format!("{}: {}", self.path.display(), e)))?
      .decode()?;
    Ok(self.rotate.apply(&image.to_rgb8()))
  }
}

impl InputDevice for ImageFile {
  fn initialize(&mut self, request: InitRequest) -> Result<(), InitError> {
    self.state.ensure_uninitialized()?;
    request.validate()?;

    let image = match request {
      InitRequest::ByIndex(_) => {
        return Err(InitError::Unsupported(
          "image files cannot be selected by index",
        ));
      }
      InitRequest::Default => self.load()?,
      // 先旋转再缩放，输出尺寸与请求一致
      InitRequest::WithResolution { width, height } => {
        let image = self.load()?;
        if image.dimensions() != (width, height) {
          info!(
            "Resizing {} from {:?} to {}x{}",
            self.path.display(),
            image.dimensions(),
            width,
            height
          );
          image::imageops::resize(&image, width, height, FilterType::Triangle)
        } else {
          image
        }
      }
    };

    let (width, height) = image.dimensions();
    self.image = Some(image);
    self.served = false;
    self.state.mark_initialized(width, height);
    info!(
      "Image file {} opened: {}x{}",
      self.path.display(),
      width,
      height
    );
    Ok(())
  }

  fn read(&mut self, frame: &mut RgbImage) -> Result<(), ReadError> {
    self.state.ensure_initialized()?;
    if self.served && !self.looping {
      return Err(ReadError::EndOfStream);
    }

    let image = self
      .image
      .as_ref()
      .ok_or_else(|| ReadError::Fatal("image is not loaded".to_string()))?;
    if frame.dimensions() == image.dimensions() {
      frame.copy_from_slice(image.as_raw());
    } else {
      *frame = image.clone();
    }
    self.served = true;
    Ok(())
  }

  fn configure(&mut self, config: &DeviceConfig) -> Result<(), ConfigError> {
    if config.fps.is_some() {
      return Err(ConfigError::Unsupported("fps"));
    }
    if config.exposure.is_some() {
      return Err(ConfigError::Unsupported("exposure"));
    }

    if let Some(looping) = config.looping {
      self.looping = looping;
    }
    if let Some(rotate) = config.rotate {
      // 旋转在加载时完成，宽高随之确定
      if self.state.initialized {
        warn!("Rotation of {} requested after open", self.path.display());
        return Err(ConfigError::AlreadyInitialized);
      }
      self.rotate = rotate;
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
