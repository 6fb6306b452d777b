// 该文件是 Tongjian （桶检） 项目的一部分。
// src/model.rs - 检测数据模型与标签映射
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

use crate::frame::RgbFrame;

/// 检测器接口：缓存的模型句柄注入调用方时只暴露这一个入口。
pub trait Detector {
  type Error;

  fn detect(&mut self, frame: &RgbFrame) -> Result<DetectResult, Self::Error>;
}

/// 单个检测目标，bbox 为原图像素坐标 [x_min, y_min, x_max, y_max]。
#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4],
}

/// 一张图像的检测结果。ort 检测器返回的 items 按置信度降序排列。
#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn empty() -> Self {
    DetectResult::default()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn first(&self) -> Option<&DetectItem> {
    self.items.first()
  }
}

#[derive(Error, Debug)]
pub enum LabelMapError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("标签文件必须是 JSON 对象")]
  NotAnObject,
  #[error("标签键无效: {0}")]
  InvalidKey(String),
  #[error("标签值无效: 键 {0} 的值必须是字符串")]
  InvalidValue(String),
  #[error("标签表为空")]
  Empty,
}

/// 类别编号到状态名称的映射。
///
/// 数据驱动：新增类别只改配置，不改代码。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
  labels: BTreeMap<u32, String>,
}

impl Default for LabelMap {
  /// 垃圾桶模型的两类默认映射。
  fn default() -> Self {
    LabelMap::from_pairs([(0, "full"), (1, "empty")])
  }
}

impl LabelMap {
  pub fn from_pairs<S: Into<String>>(pairs: impl IntoIterator<Item = (u32, S)>) -> Self {
    LabelMap {
      labels: pairs.into_iter().map(|(id, name)| (id, name.into())).collect(),
    }
  }

  /// 从 JSON 对象文件加载，例如 `{"0": "full", "1": "empty"}`。
  pub fn from_json_file(path: &Path) -> Result<Self, LabelMapError> {
    let text = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    let object = value.as_object().ok_or(LabelMapError::NotAnObject)?;

    let mut labels = BTreeMap::new();
    for (key, value) in object {
      let id = key
        .parse::<u32>()
        .map_err(|_| LabelMapError::InvalidKey(key.clone()))?;
      let name = value
        .as_str()
        .ok_or_else(|| LabelMapError::InvalidValue(key.clone()))?;
      labels.insert(id, name.to_string());
    }

    if labels.is_empty() {
      return Err(LabelMapError::Empty);
    }

    Ok(LabelMap { labels })
  }

  pub fn get(&self, class_id: u32) -> Option<&str> {
    self.labels.get(&class_id).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  /// 映射是否覆盖 0..num_classes 的全部类别编号。
  /// 模型能输出的每个编号都必须有名字，否则分类阶段会显式失败。
  pub fn covers(&self, num_classes: usize) -> bool {
    (0..num_classes as u32).all(|id| self.labels.contains_key(&id))
  }

  /// 绘制用的展示名称：未映射的类别回退为数字编号。
  pub fn display(&self, class_id: u32) -> String {
    match self.get(class_id) {
      Some(name) => name.to_string(),
      None => class_id.to_string(),
    }
  }
}

mod yolo;
pub use self::yolo::{Device, Yolo, YoloBuilder, YoloConfig, YoloError};
