// 该文件是 Tongjian （桶检） 项目的一部分。
// src/classify.rs - 状态分类
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use tracing::warn;

use crate::model::{DetectResult, LabelMap};

/// 一次请求的分类结论。
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
  pub label: String,
  pub confidence: f32,
}

/// 从检测结果中挑选主目标的规则。
///
/// 检测器输出按置信度降序排列，两条规则通常等价；
/// 只有喂入未排序的检测结果时才会出现差异。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionRule {
  /// 取返回序列的第 0 项
  #[default]
  Primary,
  /// 扫描整个序列取置信度最高的一项
  HighestConfidence,
}

/// 类别编号不在标签表中时的处理策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownClassPolicy {
  /// 显式失败
  #[default]
  Fail,
  /// 记录警告并视为未分类，绝不回退到固定标签
  Warn,
}

#[derive(Error, Debug)]
pub enum ClassifyError {
  #[error("未知类别: {class_id} 不在标签表中")]
  UnknownClass { class_id: u32 },
}

#[derive(Debug, Clone)]
pub struct Classifier {
  label_map: LabelMap,
  selection: SelectionRule,
  unknown_class: UnknownClassPolicy,
}

impl Classifier {
  pub fn new(label_map: LabelMap) -> Self {
    Classifier {
      label_map,
      selection: SelectionRule::default(),
      unknown_class: UnknownClassPolicy::default(),
    }
  }

  pub fn with_selection(mut self, selection: SelectionRule) -> Self {
    self.selection = selection;
    self
  }

  pub fn with_unknown_class(mut self, policy: UnknownClassPolicy) -> Self {
    self.unknown_class = policy;
    self
  }

  pub fn label_map(&self) -> &LabelMap {
    &self.label_map
  }

  /// 空检测结果返回 `Ok(None)`，由调用方报告“未检测到目标”；
  /// 这不是错误。
  pub fn classify(&self, detections: &DetectResult) -> Result<Option<Classification>, ClassifyError> {
    let selected = match self.selection {
      SelectionRule::Primary => detections.first(),
      SelectionRule::HighestConfidence => detections
        .items
        .iter()
        .max_by(|a, b| a.score.total_cmp(&b.score)),
    };

    let Some(item) = selected else {
      return Ok(None);
    };

    match self.label_map.get(item.class_id) {
      Some(label) => Ok(Some(Classification {
        label: label.to_string(),
        confidence: item.score,
      })),
      None => match self.unknown_class {
        UnknownClassPolicy::Fail => Err(ClassifyError::UnknownClass {
          class_id: item.class_id,
        }),
        UnknownClassPolicy::Warn => {
          warn!("类别 {} 不在标签表中，跳过分类", item.class_id);
          Ok(None)
        }
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;

  fn detections(items: Vec<DetectItem>) -> DetectResult {
    DetectResult {
      items: items.into_boxed_slice(),
    }
  }

  fn item(class_id: u32, score: f32) -> DetectItem {
    DetectItem {
      class_id,
      score,
      bbox: [10.0, 10.0, 50.0, 50.0],
    }
  }

  #[test]
  fn empty_detections_classify_to_none() {
    let classifier = Classifier::new(LabelMap::default());
    let result = classifier.classify(&DetectResult::empty()).unwrap();
    assert_eq!(result, None);
  }

  #[test]
  fn single_detection_maps_to_label() {
    // 一个 90% 置信度的满桶检测
    let classifier = Classifier::new(LabelMap::default());
    let result = classifier
      .classify(&detections(vec![item(0, 0.90)]))
      .unwrap()
      .unwrap();

    assert_eq!(result.label, "full");
    assert_eq!(result.confidence, 0.90);
  }

  #[test]
  fn primary_rule_takes_index_zero() {
    let classifier = Classifier::new(LabelMap::default());
    let result = classifier
      .classify(&detections(vec![item(1, 0.4), item(0, 0.9)]))
      .unwrap()
      .unwrap();

    assert_eq!(result.label, "empty");
    assert_eq!(result.confidence, 0.4);
  }

  #[test]
  fn highest_confidence_rule_scans_whole_sequence() {
    let classifier =
      Classifier::new(LabelMap::default()).with_selection(SelectionRule::HighestConfidence);
    let result = classifier
      .classify(&detections(vec![item(1, 0.4), item(0, 0.9)]))
      .unwrap()
      .unwrap();

    assert_eq!(result.label, "full");
    assert_eq!(result.confidence, 0.9);
  }

  #[test]
  fn unknown_class_fails_by_default() {
    let classifier = Classifier::new(LabelMap::default());
    let result = classifier.classify(&detections(vec![item(7, 0.9)]));

    assert!(matches!(
      result,
      Err(ClassifyError::UnknownClass { class_id: 7 })
    ));
  }

  #[test]
  fn unknown_class_warn_policy_yields_none() {
    let classifier =
      Classifier::new(LabelMap::default()).with_unknown_class(UnknownClassPolicy::Warn);
    let result = classifier.classify(&detections(vec![item(7, 0.9)])).unwrap();

    assert_eq!(result, None);
  }

  #[test]
  fn classification_is_deterministic() {
    let classifier = Classifier::new(LabelMap::default());
    let set = detections(vec![item(0, 0.9), item(1, 0.8)]);

    let first = classifier.classify(&set).unwrap();
    let second = classifier.classify(&set).unwrap();
    assert_eq!(first, second);
  }
}
