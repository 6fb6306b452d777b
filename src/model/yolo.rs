// 该文件是 Tongjian （桶检） 项目的一部分。
// src/model/yolo.rs - YOLO ONNX 检测器
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use image::imageops;
use ndarray::Array4;
use ort::{
  inputs,
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::frame::RgbFrame;
use crate::model::{DetectItem, DetectResult, Detector};

const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_NMS_THRESHOLD: f32 = 0.45;
const DEFAULT_NUM_CLASSES: usize = 2;
const DEFAULT_INTRA_THREADS: usize = 4;

// letterbox 填充灰度，YOLO 训练约定
const LETTERBOX_FILL: f32 = 114.0 / 255.0;
// 每个候选框的坐标分量数 (cx, cy, w, h)
const BOX_ATTRS: usize = 4;

/// 推理设备。目前所有部署都只用 CPU。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
  #[default]
  Cpu,
}

#[derive(Debug, Clone)]
pub struct YoloConfig {
  /// ONNX 模型文件路径
  pub model_path: PathBuf,
  /// 模型输入边长（正方形）
  pub input_size: u32,
  /// 置信度阈值 (0.0 - 1.0)
  pub confidence_threshold: f32,
  /// NMS IOU 阈值 (0.0 - 1.0)
  pub nms_threshold: f32,
  /// 最大检测数量，0 表示无限制
  pub max_detections: usize,
  /// 类别数量，须与标签表一致
  pub num_classes: usize,
  pub device: Device,
  /// onnxruntime 算子内并行线程数
  pub intra_threads: usize,
}

impl YoloConfig {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    YoloConfig {
      model_path: model_path.into(),
      input_size: DEFAULT_INPUT_SIZE,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      nms_threshold: DEFAULT_NMS_THRESHOLD,
      max_detections: 0,
      num_classes: DEFAULT_NUM_CLASSES,
      device: Device::Cpu,
      intra_threads: DEFAULT_INTRA_THREADS,
    }
  }
}

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("模型加载错误: {0}")]
  ModelLoad(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(#[source] ort::Error),
  #[error("推理错误: {0}")]
  Inference(#[from] ort::Error),
  #[error("模型输出形状不符合预期: {0}")]
  OutputShape(String),
}

pub struct YoloBuilder {
  config: YoloConfig,
}

impl YoloBuilder {
  pub fn new(config: YoloConfig) -> Self {
    YoloBuilder { config }
  }

  pub fn build(self) -> Result<Yolo, YoloError> {
    info!("加载模型文件: {}", self.config.model_path.display());
    let model_data = std::fs::read(&self.config.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    // 目前只有 CPU 部署，不注册任何加速后端
    let Device::Cpu = self.config.device;

    info!("创建 onnxruntime 推理会话");
    let session = Session::builder()
      .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
      .and_then(|builder| builder.with_intra_threads(self.config.intra_threads))
      .and_then(|builder| builder.commit_from_memory(&model_data))
      .map_err(YoloError::ModelInvalid)?;

    let input_name = session
      .inputs
      .first()
      .map(|input| input.name.clone())
      .unwrap_or_else(|| "images".to_string());
    debug!("模型输入张量名: {}", input_name);
    info!("模型加载完成");

    Ok(Yolo {
      session,
      input_name,
      config: self.config,
    })
  }
}

/// letterbox 缩放参数，用于把检测框映射回原图坐标。
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
  scale: f32,
  pad_x: f32,
  pad_y: f32,
}

impl Letterbox {
  fn unmap_x(&self, x: f32) -> f32 {
    (x - self.pad_x) / self.scale
  }

  fn unmap_y(&self, y: f32) -> f32 {
    (y - self.pad_y) / self.scale
  }
}

fn letterbox_params(src_w: u32, src_h: u32, size: u32) -> (Letterbox, u32, u32) {
  let scale = (size as f32 / src_w as f32).min(size as f32 / src_h as f32);
  let new_w = ((src_w as f32 * scale).round() as u32).clamp(1, size);
  let new_h = ((src_h as f32 * scale).round() as u32).clamp(1, size);
  let pad_x = (size - new_w) / 2;
  let pad_y = (size - new_h) / 2;

  (
    Letterbox {
      scale,
      pad_x: pad_x as f32,
      pad_y: pad_y as f32,
    },
    new_w,
    new_h,
  )
}

/// 把 YOLO 检测头输出解码为原图坐标的候选框。
///
/// 支持两种导出布局：属性主序 `[1, 4+nc, N]`（ultralytics 默认）
/// 和候选框主序 `[1, N, 4+nc]`。类别分数已是概率，无单独 objectness。
fn decode_head(
  dims: (usize, usize),
  data: &[f32],
  config: &YoloConfig,
  letterbox: &Letterbox,
  orig_w: f32,
  orig_h: f32,
) -> Result<Vec<DetectItem>, YoloError> {
  let attrs = BOX_ATTRS + config.num_classes;
  let (boxes_major, num_boxes) = if dims.0 == attrs {
    (false, dims.1)
  } else if dims.1 == attrs {
    (true, dims.0)
  } else {
    return Err(YoloError::OutputShape(format!(
      "期望 [1, {attrs}, N] 或 [1, N, {attrs}], 实际 [1, {}, {}]",
      dims.0, dims.1
    )));
  };

  if data.len() != num_boxes * attrs {
    return Err(YoloError::OutputShape(format!(
      "输出数据长度 {} 与形状 [1, {}, {}] 不一致",
      data.len(),
      dims.0,
      dims.1
    )));
  }

  let at = |anchor: usize, attr: usize| {
    if boxes_major {
      data[anchor * attrs + attr]
    } else {
      data[attr * num_boxes + anchor]
    }
  };

  let mut items = Vec::new();
  for anchor in 0..num_boxes {
    let mut score = 0.0f32;
    let mut class_id = 0u32;
    for class in 0..config.num_classes {
      let class_score = at(anchor, BOX_ATTRS + class);
      if class_score > score {
        score = class_score;
        class_id = class as u32;
      }
    }

    if score < config.confidence_threshold {
      continue;
    }

    let cx = at(anchor, 0);
    let cy = at(anchor, 1);
    let w = at(anchor, 2);
    let h = at(anchor, 3);

    let x_min = letterbox.unmap_x(cx - w / 2.0).clamp(0.0, orig_w);
    let y_min = letterbox.unmap_y(cy - h / 2.0).clamp(0.0, orig_h);
    let x_max = letterbox.unmap_x(cx + w / 2.0).clamp(0.0, orig_w);
    let y_max = letterbox.unmap_y(cy + h / 2.0).clamp(0.0, orig_h);

    if x_max <= x_min || y_max <= y_min {
      continue;
    }

    items.push(DetectItem {
      class_id,
      score,
      bbox: [x_min, y_min, x_max, y_max],
    });
  }

  Ok(items)
}

/// 非极大值抑制。返回结果按置信度降序排列。
fn nms(mut detections: Vec<DetectItem>, nms_threshold: f32) -> Vec<DetectItem> {
  detections.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut result = Vec::new();
  while !detections.is_empty() {
    let best = detections.remove(0);

    detections.retain(|det| {
      if det.class_id != best.class_id {
        return true;
      }
      iou(&best, det) < nms_threshold
    });

    result.push(best);
  }

  result
}

/// NMS 之后保留置信度最高的前 max_detections 个，0 表示无限制。
fn cap_detections(items: &mut Vec<DetectItem>, max_detections: usize) {
  if max_detections > 0 && items.len() > max_detections {
    items.truncate(max_detections);
  }
}

fn iou(a: &DetectItem, b: &DetectItem) -> f32 {
  let x1 = a.bbox[0].max(b.bbox[0]);
  let y1 = a.bbox[1].max(b.bbox[1]);
  let x2 = a.bbox[2].min(b.bbox[2]);
  let y2 = a.bbox[3].min(b.bbox[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a.bbox[2] - a.bbox[0]) * (a.bbox[3] - a.bbox[1]);
  let area_b = (b.bbox[2] - b.bbox[0]) * (b.bbox[3] - b.bbox[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

/// ort 会话包装的 YOLO 检测器。
///
/// 会话加载代价大且模型不可变，进程内应只构建一次，
/// 由 `crate::pipeline::DetectorCell` 缓存复用。
pub struct Yolo {
  session: Session,
  input_name: String,
  config: YoloConfig,
}

impl Yolo {
  pub fn config(&self) -> &YoloConfig {
    &self.config
  }

  /// 等比缩放并填充到模型输入尺寸，输出 NCHW f32 张量。
  fn preprocess(&self, frame: &RgbFrame) -> (Array4<f32>, Letterbox) {
    let size = self.config.input_size;
    let (letterbox, new_w, new_h) = letterbox_params(frame.width(), frame.height(), size);

    let image = frame.to_rgb_image();
    let resized = imageops::resize(&image, new_w, new_h, imageops::FilterType::Triangle);

    let side = size as usize;
    let mut tensor = Array4::from_elem((1, 3, side, side), LETTERBOX_FILL);
    let pad_x = letterbox.pad_x as usize;
    let pad_y = letterbox.pad_y as usize;
    for (x, y, pixel) in resized.enumerate_pixels() {
      let tx = x as usize + pad_x;
      let ty = y as usize + pad_y;
      for channel in 0..3 {
        tensor[[0, channel, ty, tx]] = pixel[channel] as f32 / 255.0;
      }
    }

    (tensor, letterbox)
  }

  /// 执行一次前向推理，返回检测头的形状与数据。
  fn forward(&mut self, tensor: Array4<f32>) -> Result<((usize, usize), Vec<f32>), YoloError> {
    let shape: Vec<usize> = tensor.shape().to_vec();
    let (data, _offset) = tensor.into_raw_vec_and_offset();
    let input = Tensor::from_array(([shape[0], shape[1], shape[2], shape[3]], data))?;

    debug!("执行模型推理");
    let outputs = self.session.run(inputs![self.input_name.as_str() => input])?;

    let (out_shape, out_data) = outputs[0].try_extract_tensor::<f32>()?;
    if out_shape.len() != 3 || out_shape[0] != 1 {
      return Err(YoloError::OutputShape(format!(
        "期望三维批量输出, 实际 {:?}",
        out_shape
      )));
    }

    Ok((
      (out_shape[1] as usize, out_shape[2] as usize),
      out_data.to_vec(),
    ))
  }
}

impl Detector for Yolo {
  type Error = YoloError;

  fn detect(&mut self, frame: &RgbFrame) -> Result<DetectResult, YoloError> {
    let orig_w = frame.width() as f32;
    let orig_h = frame.height() as f32;

    debug!("预处理: letterbox 到 {}", self.config.input_size);
    let (tensor, letterbox) = self.preprocess(frame);

    let (dims, data) = self.forward(tensor)?;
    let candidates = decode_head(dims, &data, &self.config, &letterbox, orig_w, orig_h)?;
    debug!("阈值过滤后候选框数量: {}", candidates.len());

    let mut items = nms(candidates, self.config.nms_threshold);
    cap_detections(&mut items, self.config.max_detections);
    debug!("检测到 {} 个目标", items.len());

    Ok(DetectResult {
      items: items.into_boxed_slice(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn identity_letterbox() -> Letterbox {
    Letterbox {
      scale: 1.0,
      pad_x: 0.0,
      pad_y: 0.0,
    }
  }

  fn test_config() -> YoloConfig {
    YoloConfig::new("unused.onnx")
  }

  #[test]
  fn letterbox_square_input_is_identity() {
    let (letterbox, new_w, new_h) = letterbox_params(640, 640, 640);
    assert_eq!((new_w, new_h), (640, 640));
    assert_eq!(letterbox, identity_letterbox());
  }

  #[test]
  fn letterbox_wide_input_pads_vertically() {
    let (letterbox, new_w, new_h) = letterbox_params(1280, 640, 640);
    assert_eq!((new_w, new_h), (640, 320));
    assert_eq!(letterbox.scale, 0.5);
    assert_eq!(letterbox.pad_x, 0.0);
    assert_eq!(letterbox.pad_y, 160.0);

    // 填充边缘映射回原图边缘
    assert_eq!(letterbox.unmap_y(160.0), 0.0);
    assert_eq!(letterbox.unmap_y(480.0), 640.0);
    assert_eq!(letterbox.unmap_x(640.0), 1280.0);
  }

  // 属性主序张量 [attrs, num_boxes]，按行展开
  fn attrs_major(rows: &[&[f32]]) -> Vec<f32> {
    rows.iter().flat_map(|row| row.iter().copied()).collect()
  }

  #[test]
  fn decode_rejects_unexpected_shapes() {
    let config = test_config();
    let result = decode_head(
      (7, 10),
      &vec![0.0; 70],
      &config,
      &identity_letterbox(),
      640.0,
      640.0,
    );
    assert!(matches!(result, Err(YoloError::OutputShape(_))));

    let result = decode_head(
      (6, 10),
      &vec![0.0; 59],
      &config,
      &identity_letterbox(),
      640.0,
      640.0,
    );
    assert!(matches!(result, Err(YoloError::OutputShape(_))));
  }

  #[test]
  fn decode_filters_by_confidence_threshold() {
    let config = test_config();
    // 两个候选框：一个 0.9，一个低于阈值的 0.1
    let data = attrs_major(&[
      &[100.0, 300.0], // cx
      &[100.0, 300.0], // cy
      &[40.0, 40.0],   // w
      &[40.0, 40.0],   // h
      &[0.9, 0.1],     // full
      &[0.05, 0.02],   // empty
    ]);

    let items = decode_head((6, 2), &data, &config, &identity_letterbox(), 640.0, 640.0).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].class_id, 0);
    assert_eq!(items[0].score, 0.9);
    assert_eq!(items[0].bbox, [80.0, 80.0, 120.0, 120.0]);
  }

  #[test]
  fn decode_boxes_major_layout_matches() {
    let config = test_config();
    // 同一个候选框的两种布局
    let attrs = attrs_major(&[&[100.0], &[100.0], &[40.0], &[40.0], &[0.2], &[0.8]]);
    let boxes = vec![100.0, 100.0, 40.0, 40.0, 0.2, 0.8];

    let from_attrs =
      decode_head((6, 1), &attrs, &config, &identity_letterbox(), 640.0, 640.0).unwrap();
    let from_boxes =
      decode_head((1, 6), &boxes, &config, &identity_letterbox(), 640.0, 640.0).unwrap();

    assert_eq!(from_attrs, from_boxes);
    assert_eq!(from_attrs[0].class_id, 1);
  }

  #[test]
  fn decode_maps_boxes_back_through_letterbox() {
    let config = test_config();
    // 1280x640 原图，缩放 0.5，垂直填充 160
    let letterbox = Letterbox {
      scale: 0.5,
      pad_x: 0.0,
      pad_y: 160.0,
    };
    let data = attrs_major(&[&[320.0], &[320.0], &[100.0], &[80.0], &[0.9], &[0.1]]);

    let items = decode_head((6, 1), &data, &config, &letterbox, 1280.0, 640.0).unwrap();
    assert_eq!(items[0].bbox, [540.0, 240.0, 740.0, 400.0]);
  }

  #[test]
  fn decode_clamps_boxes_to_image_bounds() {
    let config = test_config();
    let data = attrs_major(&[&[10.0], &[10.0], &[60.0], &[60.0], &[0.9], &[0.1]]);

    let items = decode_head((6, 1), &data, &config, &identity_letterbox(), 640.0, 640.0).unwrap();
    assert_eq!(items[0].bbox, [0.0, 0.0, 40.0, 40.0]);
  }

  fn item(class_id: u32, score: f32, bbox: [f32; 4]) -> DetectItem {
    DetectItem {
      class_id,
      score,
      bbox,
    }
  }

  #[test]
  fn nms_suppresses_overlapping_same_class() {
    let kept = nms(
      vec![
        item(0, 0.8, [82.0, 82.0, 122.0, 122.0]),
        item(0, 0.9, [80.0, 80.0, 120.0, 120.0]),
      ],
      0.45,
    );

    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].score, 0.9);
  }

  #[test]
  fn nms_keeps_overlapping_different_classes() {
    let kept = nms(
      vec![
        item(0, 0.9, [80.0, 80.0, 120.0, 120.0]),
        item(1, 0.8, [82.0, 82.0, 122.0, 122.0]),
      ],
      0.45,
    );

    assert_eq!(kept.len(), 2);
  }

  #[test]
  fn nms_sorts_descending_by_score() {
    let kept = nms(
      vec![
        item(0, 0.3, [0.0, 0.0, 10.0, 10.0]),
        item(0, 0.9, [500.0, 500.0, 510.0, 510.0]),
        item(1, 0.6, [200.0, 200.0, 210.0, 210.0]),
      ],
      0.45,
    );

    let scores: Vec<f32> = kept.iter().map(|det| det.score).collect();
    assert_eq!(scores, vec![0.9, 0.6, 0.3]);
  }

  #[test]
  fn cap_keeps_highest_confidence_item() {
    let mut items = vec![
      item(0, 0.9, [500.0, 500.0, 510.0, 510.0]),
      item(1, 0.6, [200.0, 200.0, 210.0, 210.0]),
    ];
    cap_detections(&mut items, 1);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].score, 0.9);

    // 0 表示无限制
    let mut unbounded = vec![
      item(0, 0.9, [0.0, 0.0, 1.0, 1.0]),
      item(0, 0.8, [2.0, 2.0, 3.0, 3.0]),
    ];
    cap_detections(&mut unbounded, 0);
    assert_eq!(unbounded.len(), 2);
  }

  #[test]
  fn iou_of_disjoint_boxes_is_zero() {
    let a = item(0, 1.0, [0.0, 0.0, 10.0, 10.0]);
    let b = item(0, 1.0, [20.0, 20.0, 30.0, 30.0]);
    assert_eq!(iou(&a, &b), 0.0);
  }

  #[test]
  fn iou_of_identical_boxes_is_one() {
    let a = item(0, 1.0, [0.0, 0.0, 10.0, 10.0]);
    assert_eq!(iou(&a, &a), 1.0);
  }

  #[test]
  fn missing_model_file_fails_with_model_load() {
    let result = YoloBuilder::new(YoloConfig::new("/nonexistent/best.onnx")).build();
    assert!(matches!(result, Err(YoloError::ModelLoad(_))));
  }
}
