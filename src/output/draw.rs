// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 检测结果标注
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

use ab_glyph::{FontArc, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::detection::DetectionResult;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 14.0;
const HEADER_FONT_SIZE: f32 = 16.0;
const LABEL_LINE_HEIGHT: i32 = 16;
const LABEL_OFFSET_Y: i32 = 15; // 标签锚点在检测框上方
const HEADER_ANCHOR: (i32, i32) = (0, 65);
const LABEL_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const HEADER_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色
const BOX_COLOR: [u8; 3] = [100, 100, 100]; // 灰色

/// 检测结果的文字描述，每个元素为一行
pub fn label_lines(result: &DetectionResult) -> Vec<String> {
  let mut lines = Vec::with_capacity(2);
  if let Some(confidence) = result.confidence {
    lines.push(format!(
      "face detection confidence: {}: {:.3},",
      result.label, confidence
    ));
  }
  if let (Some(male_probability), Some(age)) = (result.male_probability, result.age) {
    let gender = if male_probability > 0.5 { "M" } else { "F" };
    lines.push(format!("Gender: {},Age: {:.0},", gender, age));
  }
  lines
}

/// 在帧上绘制检测框、标签与标题文字
pub struct Annotator {
  font: FontArc,
  label_scale: PxScale,
  header_scale: PxScale,
  line_height: i32,
  label_color: Rgb<u8>,
  header_color: Rgb<u8>,
  box_color: Rgb<u8>,
}

impl Annotator {
  /// 使用内置字体
  pub fn new() -> Result<Self, InvalidFont> {
    let font_data = include_bytes!("../../assets/DejaVuSans.ttf");
    Ok(Self::with_font(FontArc::try_from_slice(font_data)?))
  }

  pub fn with_font(font: FontArc) -> Self {
    Self {
      font,
      label_scale: PxScale::from(LABEL_FONT_SIZE),
      header_scale: PxScale::from(HEADER_FONT_SIZE),
      line_height: LABEL_LINE_HEIGHT,
      label_color: Rgb(LABEL_COLOR),
      header_color: Rgb(HEADER_COLOR),
      box_color: Rgb(BOX_COLOR),
    }
  }

  /// 文字行从锚点 `(x, y - 15)` 向上堆叠，最后一行位于锚点处；
  /// 超出画面的部分由绘制函数裁剪。
  pub fn annotate(&self, image: &mut RgbImage, result: &DetectionResult) {
    let location = result.location;
    let lines = label_lines(result);
    let anchor_y = location.y - LABEL_OFFSET_Y;
    let count = lines.len() as i32;

    for (i, line) in lines.iter().enumerate() {
      let y = anchor_y - (count - 1 - i as i32) * self.line_height;
      draw_text_mut(
        image,
        self.label_color,
        location.x,
        y,
        self.label_scale,
        &self.font,
        line,
      );
    }

    // 零宽或零高的矩形无法构造
    if location.width > 0 && location.height > 0 {
      let rect = Rect::at(location.x, location.y).of_size(location.width, location.height);
      draw_hollow_rect_mut(image, rect, self.box_color);
    }
  }

  pub fn draw_header(&self, image: &mut RgbImage, text: &str) {
    if text.is_empty() {
      return;
    }
    draw_text_mut(
      image,
      self.header_color,
      HEADER_ANCHOR.0,
      HEADER_ANCHOR.1,
      self.header_scale,
      &self.font,
      text,
    );
  }
}
