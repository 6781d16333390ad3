// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output.rs - 输出定义
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
use url::Url;

use crate::FromUrl;

/// 按窗口名显示帧的表面
pub trait DisplaySurface {
  type Error;
  fn show(&mut self, window: &str, frame: &RgbImage) -> Result<(), Self::Error>;
}

#[cfg(not(any(feature = "gstreamer_output", feature = "directory_record")))]
compile_error!("至少需要启用一个显示输出特性: gstreamer_output 或 directory_record");

pub mod draw;
mod sink;

pub use self::draw::Annotator;
pub use self::sink::{AnnotatedDisplaySink, SinkError};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_window;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_window::{GStreamerWindow, GStreamerWindowError};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecord, DirectoryRecordError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 窗口输出错误: {0}")]
  GStreamerWindowError(#[from] GStreamerWindowError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordError(#[from] DirectoryRecordError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum SurfaceWrapper {
  #[cfg(feature = "gstreamer_output")]
  GStreamerWindow(GStreamerWindow),
  #[cfg(feature = "directory_record")]
  DirectoryRecord(DirectoryRecord),
}

impl FromUrl for SurfaceWrapper {
  type Error = OutputError;

  #[allow(unused_imports)]
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    match url.scheme() {
      #[cfg(feature = "gstreamer_output")]
      GStreamerWindow::SCHEME => Ok(SurfaceWrapper::GStreamerWindow(
        GStreamerWindow::from_url(url)?,
      )),
      #[cfg(feature = "directory_record")]
      DirectoryRecord::SCHEME => Ok(SurfaceWrapper::DirectoryRecord(
        DirectoryRecord::from_url(url)?,
      )),
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl DisplaySurface for SurfaceWrapper {
  type Error = OutputError;

  #[allow(unused_variables)]
  fn show(&mut self, window: &str, frame: &RgbImage) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "gstreamer_output")]
      SurfaceWrapper::GStreamerWindow(surface) => {
        surface.show(window, frame).map_err(OutputError::from)
      }
      #[cfg(feature = "directory_record")]
      SurfaceWrapper::DirectoryRecord(surface) => {
        surface.show(window, frame).map_err(OutputError::from)
      }
    }
  }
}
