// 该文件是 Shanan （山南西风） 项目的一部分。
// src/detection.rs - 检测结果定义
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

use std::io::BufRead;

use image::RgbImage;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::debug;

/// 像素坐标下的矩形，(x, y) 为左上角
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct Rect {
  pub x: i32,
  pub y: i32,
  pub width: u32,
  pub height: u32,
}

impl Rect {
  pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }
}

/// 推理阶段产出的单个检测结果
///
/// 可选的数值属性在上游以 `-1` 表示缺失，这里统一转为 `None`。
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectionResult {
  pub location: Rect,
  #[serde(default)]
  pub label: String,
  #[serde(default, deserialize_with = "non_negative")]
  pub confidence: Option<f32>,
  #[serde(default, alias = "male_prob", deserialize_with = "non_negative")]
  pub male_probability: Option<f32>,
  #[serde(default, deserialize_with = "non_negative")]
  pub age: Option<f32>,
}

fn sentinel(value: f32) -> Option<f32> {
  (value >= 0.0).then_some(value)
}

fn non_negative<'de, D>(deserializer: D) -> Result<Option<f32>, D::Error>
where
  D: Deserializer<'de>,
{
  let value: Option<f32> = Option::deserialize(deserializer)?;
  Ok(value.and_then(sentinel))
}

impl DetectionResult {
  pub fn new(location: Rect, label: impl Into<String>) -> Self {
    Self {
      location,
      label: label.into(),
      confidence: None,
      male_probability: None,
      age: None,
    }
  }

  /// 按上游约定构造：负值（`-1`）表示该属性缺失
  pub fn with_sentinels(
    location: Rect,
    label: impl Into<String>,
    confidence: f32,
    male_probability: f32,
    age: f32,
  ) -> Self {
    Self {
      location,
      label: label.into(),
      confidence: sentinel(confidence),
      male_probability: sentinel(male_probability),
      age: sentinel(age),
    }
  }

  pub fn with_confidence(mut self, confidence: f32) -> Self {
    self.confidence = sentinel(confidence);
    self
  }

  pub fn with_demographics(mut self, male_probability: f32, age: f32) -> Self {
    self.male_probability = sentinel(male_probability);
    self.age = sentinel(age);
    self
  }
}

/// 外部推理阶段
pub trait DetectionProvider {
  type Error;
  fn detect(&mut self, frame: &RgbImage) -> Result<Vec<DetectionResult>, Self::Error>;
}

/// 不产生任何检测结果，仅用于预览画面
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDetections;

impl DetectionProvider for NoDetections {
  type Error = std::convert::Infallible;

  fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<DetectionResult>, Self::Error> {
    Ok(Vec::new())
  }
}

#[derive(Error, Debug)]
pub enum DetectionFeedError {
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Invalid detections on line {line}: {source}")]
  ParseError {
    line: usize,
    source: serde_json::Error,
  },
}

/// 从 JSON Lines 读取预先计算好的检测结果
///
/// 第 n 行是第 n 帧的结果数组；文件读完后之后的帧均没有检测结果。
pub struct JsonLinesDetections<R> {
  reader: R,
  line: usize,
  exhausted: bool,
}

impl<R: BufRead> JsonLinesDetections<R> {
  pub fn new(reader: R) -> Self {
    Self {
      reader,
      line: 0,
      exhausted: false,
    }
  }
}

impl<R: BufRead> DetectionProvider for JsonLinesDetections<R> {
  type Error = DetectionFeedError;

  fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<DetectionResult>, Self::Error> {
    if self.exhausted {
      return Ok(Vec::new());
    }

    let mut buf = String::new();
    if self.reader.read_line(&mut buf)? == 0 {
      debug!("Detection feed exhausted after {} lines", self.line);
      self.exhausted = true;
      return Ok(Vec::new());
    }
    self.line += 1;

    let text = buf.trim();
    if text.is_empty() {
      return Ok(Vec::new());
    }

    serde_json::from_str(text).map_err(|source| DetectionFeedError::ParseError {
      line: self.line,
      source,
    })
  }
}
