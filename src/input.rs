// 该文件是 Tongjian （桶检） 项目的一部分。
// src/input.rs - 图像输入与归一化
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

use std::io::Cursor;
use std::path::Path;

use image::ImageReader;
use thiserror::Error;
use tracing::debug;

use crate::frame::RgbFrame;

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  Decode(#[from] image::ImageError),
}

/// 把上传的字节流解码为标准三通道 RGB 帧。
///
/// 图像格式按文件头推断。带 alpha 的输入丢弃 alpha（不做混合），
/// 灰度输入复制为三通道；四通道 PNG 不会到达检测器。
/// 此处不做任何缩放，缩放属于检测器的 letterbox 预处理。
pub fn normalize(raw: &[u8]) -> Result<RgbFrame, DecodeError> {
  let reader = ImageReader::new(Cursor::new(raw)).with_guessed_format()?;
  let decoded = reader.decode()?;

  debug!(
    "解码图像: {}x{}, 颜色类型 {:?}",
    decoded.width(),
    decoded.height(),
    decoded.color()
  );

  Ok(RgbFrame::from(decoded.to_rgb8()))
}

/// 从文件读取并归一化一张图像。
pub fn read_file(path: &Path) -> Result<RgbFrame, DecodeError> {
  let raw = std::fs::read(path)?;
  debug!("读取图像文件: {} ({} 字节)", path.display(), raw.len());
  normalize(&raw)
}
