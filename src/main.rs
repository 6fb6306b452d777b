// 该文件是 Tongjian （桶检） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use anyhow::{Context, Result, ensure};
use clap::Parser;
use tracing::info;

use tongjian::classify::Classifier;
use tongjian::model::{LabelMap, YoloConfig};
use tongjian::output::draw::Draw;
use tongjian::output::{RecordWriter, SaveImageFile};
use tongjian::pipeline::{DetectorCell, Pipeline};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型文件路径: {}", args.model.display());
  info!("输入图像: {}", args.input.display());
  info!("输出路径: {}", args.output.display());
  info!("置信度阈值: {}", args.confidence);
  info!("NMS 阈值: {}", args.nms_threshold);

  let label_map = match &args.labels {
    Some(path) => LabelMap::from_json_file(path)
      .with_context(|| format!("无法加载标签文件: {}", path.display()))?,
    None => LabelMap::default(),
  };
  // 模型能输出的每个类别编号都必须有名字
  ensure!(
    label_map.covers(label_map.len()),
    "标签表必须覆盖 0..{} 的全部类别编号",
    label_map.len()
  );

  let mut config = YoloConfig::new(&args.model);
  config.input_size = args.input_size;
  config.confidence_threshold = args.confidence;
  config.nms_threshold = args.nms_threshold;
  config.max_detections = args.max_detections;
  config.intra_threads = args.threads;
  config.num_classes = label_map.len();

  let classifier = Classifier::new(label_map)
    .with_selection(args.selection.into())
    .with_unknown_class(args.unknown_class.into());

  let draw = match &args.font {
    Some(path) => Draw::default()
      .with_font_file(path)
      .with_context(|| format!("无法加载字体文件: {}", path.display()))?,
    None => Draw::default(),
  };

  let pipeline = Pipeline::new(DetectorCell::new(config), classifier, draw);

  info!("开始推理...");
  let now = std::time::Instant::now();
  let result = pipeline.run_file(&args.input)?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  SaveImageFile::new(&args.output).save(&result.annotated)?;

  if let Some(path) = &args.record {
    RecordWriter::new(path).write(
      &result.detections,
      result.classification.as_ref(),
      pipeline.label_map(),
    )?;
  }

  match &result.classification {
    Some(classification) => {
      println!(
        "检测结果: {} (置信度 {:.2})",
        classification.label, classification.confidence
      );
    }
    None => println!("未检测到目标"),
  }
  println!("检测数量: {}", result.detections.len());
  println!("标注图像: {}", args.output.display());

  Ok(())
}
