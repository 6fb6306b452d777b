// 该文件是 Tongjian （桶检） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

use image::{Rgb, RgbImage};

const RGB_CHANNELS: usize = 3;

/// HWC 排列的三通道 RGB 帧。
///
/// 通道数固定为 3：带 alpha 或灰度的输入必须在进入检测器之前
/// 转换完成（见 `crate::input`）。帧在创建后不再被修改。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl RgbFrame {
  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// NHWC 排列的原始像素数据。
  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }

  /// 复制为 `RgbImage`，用于绘制和保存。
  pub fn to_rgb_image(&self) -> RgbImage {
    let width = self.width;
    let data = &self.data;

    RgbImage::from_fn(self.width, self.height, |x, y| {
      let idx = ((y * width + x) as usize) * RGB_CHANNELS;
      Rgb([data[idx], data[idx + 1], data[idx + 2]])
    })
  }
}

impl From<RgbImage> for RgbFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    RgbFrame {
      width,
      height,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}
