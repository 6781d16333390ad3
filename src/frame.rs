// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - 帧像素格式转换
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

//! 所有输入设备最终都产出 [`RgbImage`]，本模块负责把各种原始缓冲区
//! （YUYV、带行跨度的 RGB/BGR）转换成 RGB 图像。

use image::{RgbImage, imageops};
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("Row stride {stride} is smaller than row size {row}")]
  InvalidStride { stride: usize, row: usize },
}

/// 打包像素的通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
  Rgb,
  Bgr,
}

/// 画面旋转角度（顺时针）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
  #[default]
  None,
  Clockwise90,
  Clockwise180,
  Clockwise270,
}

impl Rotation {
  pub fn from_degrees(degrees: u32) -> Option<Self> {
    match degrees {
      0 => Some(Rotation::None),
      90 => Some(Rotation::Clockwise90),
      180 => Some(Rotation::Clockwise180),
      270 => Some(Rotation::Clockwise270),
      _ => None,
    }
  }

  /// GStreamer `videoflip` 的 method 取值
  pub fn videoflip_method(&self) -> u32 {
    match self {
      Rotation::None => 0,
      Rotation::Clockwise90 => 1,
      Rotation::Clockwise180 => 2,
      Rotation::Clockwise270 => 3,
    }
  }

  pub fn apply(&self, image: &RgbImage) -> RgbImage {
    match self {
      Rotation::None => image.clone(),
      Rotation::Clockwise90 => imageops::rotate90(image),
      Rotation::Clockwise180 => imageops::rotate180(image),
      Rotation::Clockwise270 => imageops::rotate270(image),
    }
  }
}

pub fn black_frame(width: u32, height: u32) -> RgbImage {
  RgbImage::new(width, height)
}

/// 将带行跨度的 RGB/BGR 打包数据转换为 RGB 图像，`stride` 为 0 时视为紧密排布
pub fn packed_to_rgb(
  data: &[u8],
  width: u32,
  height: u32,
  stride: usize,
  order: ChannelOrder,
) -> Result<RgbImage, FrameError> {
  let (w, h) = (width as usize, height as usize);
  let row = w * RGB_CHANNELS;
  let stride = if stride == 0 { row } else { stride };
  if stride < row {
    return Err(FrameError::InvalidStride { stride, row });
  }

  // 最后一行不要求带有填充
  let expected = if h == 0 { 0 } else { stride * (h - 1) + row };
  if data.len() < expected {
    return Err(FrameError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut rgb = Vec::with_capacity(row * h);
  for y in 0..h {
    let line = &data[y * stride..y * stride + row];
    match order {
      ChannelOrder::Rgb => rgb.extend_from_slice(line),
      ChannelOrder::Bgr => {
        for px in line.chunks_exact(RGB_CHANNELS) {
          rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        }
      }
    }
  }

  RgbImage::from_raw(width, height, rgb).ok_or(FrameError::BufferSizeMismatch {
    expected: row * h,
    actual: data.len(),
  })
}

/// 将带行跨度的 YUYV (YUV 4:2:2) 格式转换为 RGB
///
/// `stride` 为 0 时视为紧密排布。
pub fn yuyv_to_rgb(
  yuyv: &[u8],
  width: u32,
  height: u32,
  stride: usize,
) -> Result<RgbImage, FrameError> {
  let (w, h) = (width as usize, height as usize);
  let row = w * 2;
  let stride = if stride == 0 { row } else { stride };
  if stride < row {
    return Err(FrameError::InvalidStride { stride, row });
  }

  let expected = if h == 0 { 0 } else { stride * (h - 1) + row };
  if yuyv.len() < expected {
    return Err(FrameError::BufferSizeMismatch {
      expected,
      actual: yuyv.len(),
    });
  }

  let mut rgb = Vec::with_capacity(w * h * RGB_CHANNELS);
  for y in 0..h {
    let line = &yuyv[y * stride..y * stride + row];
    for chunk in line.chunks_exact(4) {
      let y0 = chunk[0] as f32;
      let u = chunk[1] as f32 - 128.0;
      let y1 = chunk[2] as f32;
      let v = chunk[3] as f32 - 128.0;

      for luma in [y0, y1] {
        let r = (luma + 1.402 * v).clamp(0.0, 255.0) as u8;
        let g = (luma - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
        let b = (luma + 1.772 * u).clamp(0.0, 255.0) as u8;
        rgb.extend_from_slice(&[r, g, b]);
      }
    }
  }

  RgbImage::from_raw(width, height, rgb).ok_or(FrameError::BufferSizeMismatch {
    expected,
    actual: yuyv.len(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn bgr_rows_with_padding_are_reordered() {
    // 2x2 BGR，每行填充 2 字节
    let data = [
      1, 2, 3, 4, 5, 6, 0, 0, //
      7, 8, 9, 10, 11, 12,
    ];
    let image = packed_to_rgb(&data, 2, 2, 8, ChannelOrder::Bgr).unwrap();
    assert_eq!(image.get_pixel(0, 0), &Rgb([3, 2, 1]));
    assert_eq!(image.get_pixel(1, 0), &Rgb([6, 5, 4]));
    assert_eq!(image.get_pixel(0, 1), &Rgb([9, 8, 7]));
    assert_eq!(image.get_pixel(1, 1), &Rgb([12, 11, 10]));
  }

  #[test]
  fn short_buffer_is_rejected() {
    let err = packed_to_rgb(&[0; 5], 2, 1, 6, ChannelOrder::Rgb).unwrap_err();
    assert_eq!(
      err,
      FrameError::BufferSizeMismatch {
        expected: 6,
        actual: 5
      }
    );
    let err = packed_to_rgb(&[0; 12], 2, 2, 4, ChannelOrder::Rgb).unwrap_err();
    assert_eq!(err, FrameError::InvalidStride { stride: 4, row: 6 });
  }

  #[test]
  fn yuyv_gray_maps_to_gray() {
    // U = V = 128 时没有色度分量
    let data = [100, 128, 200, 128];
    let image = yuyv_to_rgb(&data, 2, 1, 0).unwrap();
    assert_eq!(image.get_pixel(0, 0), &Rgb([100, 100, 100]));
    assert_eq!(image.get_pixel(1, 0), &Rgb([200, 200, 200]));
  }

  #[test]
  fn yuyv_row_padding_is_skipped() {
    // 2x2，每行 4 字节像素加 4 字节填充
    let data = [
      10, 128, 20, 128, 255, 255, 255, 255, //
      30, 128, 40, 128,
    ];
    let image = yuyv_to_rgb(&data, 2, 2, 8).unwrap();
    assert_eq!(image.get_pixel(0, 0), &Rgb([10, 10, 10]));
    assert_eq!(image.get_pixel(1, 0), &Rgb([20, 20, 20]));
    assert_eq!(image.get_pixel(0, 1), &Rgb([30, 30, 30]));
    assert_eq!(image.get_pixel(1, 1), &Rgb([40, 40, 40]));

    assert_eq!(
      yuyv_to_rgb(&data, 2, 2, 2).unwrap_err(),
      FrameError::InvalidStride { stride: 2, row: 4 }
    );
  }

  #[test]
  fn rotation_swaps_dimensions() {
    let image = black_frame(4, 2);
    assert_eq!(Rotation::Clockwise90.apply(&image).dimensions(), (2, 4));
    assert_eq!(Rotation::Clockwise180.apply(&image).dimensions(), (4, 2));
    assert_eq!(Rotation::from_degrees(45), None);
    assert_eq!(Rotation::from_degrees(270), Some(Rotation::Clockwise270));
  }
}
