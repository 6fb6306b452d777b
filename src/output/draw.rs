// 该文件是 Tongjian （桶检） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use thiserror::Error;
use tracing::warn;

use crate::frame::RgbFrame;
use crate::model::{DetectItem, DetectResult, LabelMap};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色
const BOX_THICKNESS: i32 = 2;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体文件读取错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 把检测框和标签绘制到输入帧的副本上。
///
/// 标签字体在运行时从文件加载；未配置字体时只绘制检测框。
pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  label_color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Draw {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      label_color: LABEL_COLOR,
    }
  }
}

impl Draw {
  pub fn with_font_file(mut self, path: &Path) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    self.font = Some(FontVec::try_from_vec(data)?);
    Ok(self)
  }

  /// 在输入帧的副本上标注所有检测目标并返回副本。
  /// 调用方的帧不会被修改。
  pub fn annotate(&self, frame: &RgbFrame, result: &DetectResult, labels: &LabelMap) -> RgbImage {
    let mut image = frame.to_rgb_image();

    if self.font.is_none() && !result.is_empty() {
      warn!("未配置字体文件，仅绘制检测框");
    }

    for item in result.items.iter() {
      self.draw_bbox_with_label(&mut image, item, labels);
    }

    image
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, item: &DetectItem, labels: &LabelMap) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let color = self.label_color;

    let mut x_min = item.bbox[0].floor() as i32;
    let mut y_min = item.bbox[1].floor() as i32;
    let mut x_max = item.bbox[2].ceil() as i32;
    let mut y_max = item.bbox[3].ceil() as i32;

    x_min = x_min.clamp(0, w - 1);
    y_min = y_min.clamp(0, h - 1);
    x_max = x_max.clamp(0, w - 1);
    y_max = y_max.clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 绘制边框
    for thickness in 0..BOX_THICKNESS {
      let x_min_t = (x_min + thickness).min(w - 1);
      let y_min_t = (y_min + thickness).min(h - 1);
      let x_max_t = (x_max - thickness).max(0);
      let y_max_t = (y_max - thickness).max(0);

      for x in x_min_t..=x_max_t {
        *image.get_pixel_mut(x as u32, y_min_t as u32) = Rgb(color);
        *image.get_pixel_mut(x as u32, y_max_t as u32) = Rgb(color);
      }

      for y in y_min_t..=y_max_t {
        *image.get_pixel_mut(x_min_t as u32, y as u32) = Rgb(color);
        *image.get_pixel_mut(x_max_t as u32, y as u32) = Rgb(color);
      }
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = format!("{} {:.2}", labels.display(item.class_id), item.score);

    let scale = PxScale::from(self.font_size);
    let text_color = Rgb([255u8, 255u8, 255u8]);

    // 估算文本大小（粗略估计）
    let text_width = (label.len() as f32 * self.label_char_width) as i32;
    let text_height = self.label_text_height;

    // 标签背景放在边框上方
    let label_x = x_min.max(0);
    let label_y = (y_min - text_height).max(0);

    let max_width = (w - label_x).max(0);
    let label_width = text_width.min(max_width) as u32;
    let label_height = text_height as u32;

    if label_width > 0 && label_height > 0 {
      let rect = imageproc::rect::Rect::at(label_x, label_y).of_size(label_width, label_height);
      draw_filled_rect_mut(image, rect, Rgb(color));

      draw_text_mut(
        image,
        text_color,
        label_x,
        label_y + self.label_text_vertical_padding,
        scale,
        font,
        &label,
      );
    }
  }
}
