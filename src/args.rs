// 该文件是 Tongjian （桶检） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use tongjian::classify::{SelectionRule, UnknownClassPolicy};

/// Tongjian 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型文件路径
  #[arg(long, value_name = "FILE")]
  pub model: PathBuf,

  /// 输入图像路径 (*.jpg, *.jpeg, *.png)
  #[arg(long, value_name = "IMAGE")]
  pub input: PathBuf,

  /// 标注图像输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,

  /// 检测记录 JSON 输出路径
  #[arg(long, value_name = "FILE")]
  pub record: Option<PathBuf>,

  /// 类别标签映射 JSON 文件，缺省为 {"0": "full", "1": "empty"}
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 标签字体文件，缺省时只绘制检测框
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 模型输入边长
  #[arg(long, default_value = "640", value_name = "SIZE")]
  pub input_size: u32,

  /// 最大检测数量（0 表示无限制）
  #[arg(long, default_value = "1", value_name = "COUNT")]
  pub max_detections: usize,

  /// onnxruntime 算子内并行线程数
  #[arg(long, default_value = "4", value_name = "COUNT")]
  pub threads: usize,

  /// 主目标挑选规则
  #[arg(long, value_enum, default_value = "primary")]
  pub selection: SelectionArg,

  /// 未知类别处理策略
  #[arg(long, value_enum, default_value = "fail")]
  pub unknown_class: UnknownClassArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SelectionArg {
  /// 取检测序列的第 0 项
  Primary,
  /// 取置信度最高的一项
  Highest,
}

impl From<SelectionArg> for SelectionRule {
  fn from(arg: SelectionArg) -> Self {
    match arg {
      SelectionArg::Primary => SelectionRule::Primary,
      SelectionArg::Highest => SelectionRule::HighestConfidence,
    }
  }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum UnknownClassArg {
  /// 显式失败
  Fail,
  /// 记录警告并视为未分类
  Warn,
}

impl From<UnknownClassArg> for UnknownClassPolicy {
  fn from(arg: UnknownClassArg) -> Self {
    match arg {
      UnknownClassArg::Fail => UnknownClassPolicy::Fail,
      UnknownClassArg::Warn => UnknownClassPolicy::Warn,
    }
  }
}
