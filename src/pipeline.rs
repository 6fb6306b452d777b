// 该文件是 Tongjian （桶检） 项目的一部分。
// src/pipeline.rs - 单图推理流水线
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;
use std::sync::{Arc, Mutex};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};

use crate::classify::{Classification, Classifier, ClassifyError};
use crate::frame::RgbFrame;
use crate::input::{self, DecodeError};
use crate::model::{DetectResult, Detector, LabelMap, Yolo, YoloBuilder, YoloConfig, YoloError};
use crate::output::draw::Draw;

/// 一次请求的完整产出，不做持久化。
pub struct InferenceResult {
  pub annotated: RgbImage,
  pub detections: DetectResult,
  pub classification: Option<Classification>,
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("图像解码错误: {0}")]
  Decode(#[from] DecodeError),
  #[error("检测器错误: {0}")]
  Model(#[from] YoloError),
  #[error("分类错误: {0}")]
  Classify(#[from] ClassifyError),
}

/// 进程内共享的检测器句柄。
///
/// `ort` 会话执行推理需要独占访问，句柄内部用互斥锁串行化；
/// 当前部署是单线程逐请求的，锁不会出现竞争。
#[derive(Clone)]
pub struct SharedDetector {
  inner: Arc<Mutex<Yolo>>,
}

impl SharedDetector {
  fn new(yolo: Yolo) -> Self {
    SharedDetector {
      inner: Arc::new(Mutex::new(yolo)),
    }
  }
}

impl Detector for SharedDetector {
  type Error = YoloError;

  fn detect(&mut self, frame: &RgbFrame) -> Result<DetectResult, YoloError> {
    self.inner.lock().unwrap().detect(frame)
  }
}

/// 延迟加载、加载一次的检测器单元。
///
/// 模型加载代价大且不可变：首次请求时构建会话，之后所有请求
/// 复用同一个句柄。加载检查本身由互斥锁保护，引入并发请求时
/// 依然安全。
pub struct DetectorCell {
  config: YoloConfig,
  slot: Mutex<Option<SharedDetector>>,
}

impl DetectorCell {
  pub fn new(config: YoloConfig) -> Self {
    DetectorCell {
      config,
      slot: Mutex::new(None),
    }
  }

  pub fn config(&self) -> &YoloConfig {
    &self.config
  }

  pub fn get_or_load(&self) -> Result<SharedDetector, YoloError> {
    let mut slot = self.slot.lock().unwrap();
    if let Some(detector) = slot.as_ref() {
      return Ok(detector.clone());
    }

    info!("首次请求，加载检测模型");
    let yolo = YoloBuilder::new(self.config.clone()).build()?;
    let detector = SharedDetector::new(yolo);
    *slot = Some(detector.clone());

    Ok(detector)
  }
}

/// 归一化 → 检测 → 分类 → 标注，严格顺序执行。
///
/// 任何一步失败都终止本次请求，不产出部分结果，也不重试。
pub struct Pipeline {
  detector: DetectorCell,
  classifier: Classifier,
  draw: Draw,
}

impl Pipeline {
  pub fn new(detector: DetectorCell, classifier: Classifier, draw: Draw) -> Self {
    Pipeline {
      detector,
      classifier,
      draw,
    }
  }

  pub fn label_map(&self) -> &LabelMap {
    self.classifier.label_map()
  }

  /// 处理一张上传图像的原始字节。
  pub fn run(&self, raw: &[u8]) -> Result<InferenceResult, PipelineError> {
    // 模型缺失在解码之前暴露
    let mut detector = self.detector.get_or_load()?;

    let frame = input::normalize(raw)?;
    debug!("输入图像: {}x{}", frame.width(), frame.height());

    let detections = detector.detect(&frame)?;
    let classification = self.classifier.classify(&detections)?;
    let annotated = self
      .draw
      .annotate(&frame, &detections, self.classifier.label_map());

    Ok(InferenceResult {
      annotated,
      detections,
      classification,
    })
  }

  /// 从文件读取一张图像并处理。
  pub fn run_file(&self, path: &Path) -> Result<InferenceResult, PipelineError> {
    let raw = std::fs::read(path).map_err(DecodeError::from)?;
    self.run(&raw)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cell_reports_model_load_failure() {
    let cell = DetectorCell::new(YoloConfig::new("/nonexistent/best.onnx"));
    let result = cell.get_or_load();
    assert!(matches!(result, Err(YoloError::ModelLoad(_))));
  }
}
