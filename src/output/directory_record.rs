// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::{Path, PathBuf};

use chrono::Utc;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, output::DisplaySurface};

#[derive(Error, Debug)]
pub enum DirectoryRecordError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

const DIRECTORY_RECORD_SCHEME: &str = "record";

/// 无界面显示：每次显示的帧保存为 `<目录>/<窗口名>/<时间戳>_<序号>.png`
pub struct DirectoryRecord {
  root: PathBuf,
  counter: u64,
}

impl FromUrlWithScheme for DirectoryRecord {
  const SCHEME: &'static str = DIRECTORY_RECORD_SCHEME;
}

impl FromUrl for DirectoryRecord {
  type Error = DirectoryRecordError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != DIRECTORY_RECORD_SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        DIRECTORY_RECORD_SCHEME,
        url.scheme()
      );
      return Err(DirectoryRecordError::SchemeMismatch);
    }
    Ok(DirectoryRecord::new(crate::decode_url_path(url)))
  }
}

impl DirectoryRecord {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      counter: 0,
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// 窗口名中的路径分隔符替换掉，避免写出目录之外
  fn window_dir(&self, window: &str) -> PathBuf {
    let name: String = window
      .chars()
      .map(|c| if c == '/' || c == '\\' { '_' } else { c })
      .collect();
    let name = match name.as_str() {
      "" | "." | ".." => "window".to_string(),
      _ => name,
    };
    self.root.join(name)
  }
}

impl DisplaySurface for DirectoryRecord {
  type Error = DirectoryRecordError;

  fn show(&mut self, window: &str, frame: &RgbImage) -> Result<(), Self::Error> {
    let dir = self.window_dir(window);
    std::fs::create_dir_all(&dir)?;

    let timestamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let path = dir.join(format!("{}_{:06}.png", timestamp, self.counter));
    frame.save(&path)?;
    self.counter += 1;

    debug!("保存帧到文件: {}", path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::black_frame;

  #[test]
  fn frames_land_in_window_directory() {
    let dir = tempfile::tempdir().unwrap();
    let url = Url::from_directory_path(dir.path()).unwrap();
    let url = Url::parse(&url.as_str().replacen("file", DIRECTORY_RECORD_SCHEME, 1)).unwrap();
    let mut record = DirectoryRecord::from_url(&url).unwrap();

    record.show("face preview", &black_frame(4, 4)).unwrap();
    record.show("face preview", &black_frame(4, 4)).unwrap();
    record.show("../escape", &black_frame(2, 2)).unwrap();

    let saved = std::fs::read_dir(dir.path().join("face preview"))
      .unwrap()
      .count();
    assert_eq!(saved, 2);
    assert_eq!(
      std::fs::read_dir(dir.path().join(".._escape")).unwrap().count(),
      1
    );

    let first = std::fs::read_dir(dir.path().join("face preview"))
      .unwrap()
      .next()
      .unwrap()
      .unwrap();
    let image = image::open(first.path()).unwrap().to_rgb8();
    assert_eq!(image.dimensions(), (4, 4));
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("window://").unwrap();
    assert!(matches!(
      DirectoryRecord::from_url(&url),
      Err(DirectoryRecordError::SchemeMismatch)
    ));
  }
}
