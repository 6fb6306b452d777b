// 该文件是 Tongjian （桶检） 项目的一部分。
// src/output/record.rs - 检测记录输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::classify::Classification;
use crate::model::{DetectResult, LabelMap};

#[derive(Error, Debug)]
pub enum RecordError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  Json(#[from] serde_json::Error),
}

/// 把一次推理的检测明细写成 JSON 记录文件。
pub struct RecordWriter {
  path: PathBuf,
}

impl RecordWriter {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    RecordWriter { path: path.into() }
  }

  pub fn write(
    &self,
    detections: &DetectResult,
    classification: Option<&Classification>,
    labels: &LabelMap,
  ) -> Result<(), RecordError> {
    let items: Vec<serde_json::Value> = detections
      .items
      .iter()
      .map(|item| {
        json!({
          "class_id": item.class_id,
          "label": labels.get(item.class_id),
          "score": item.score,
          "bbox": item.bbox,
        })
      })
      .collect();

    let record = json!({
      "timestamp": Utc::now().to_rfc3339(),
      "classification": classification.map(|c| {
        json!({ "label": c.label, "confidence": c.confidence })
      }),
      "detections": items,
    });

    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    std::fs::write(&self.path, serde_json::to_string_pretty(&record)?)?;
    info!("保存检测记录到: {}", self.path.display());

    Ok(())
  }
}
