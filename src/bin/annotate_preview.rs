// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/annotate_preview.rs - 采集并显示带标注的帧
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

use std::{fs::File, io::BufReader, path::PathBuf, sync::atomic::Ordering};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use shanan_display::{
  FromUrl,
  detection::{JsonLinesDetections, NoDetections},
  input::InputWrapper,
  output::{AnnotatedDisplaySink, Annotator, SurfaceWrapper},
  task::{ContinuousTask, initialize_first},
};

/// 采集帧、叠加检测结果并显示
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源，例如 v4l:///dev/video0, video:///a.mp4?loop=true, image:///a.png
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 显示目标，例如 window:// 或 record:///tmp/frames
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 窗口名
  #[arg(long, value_name = "NAME", default_value = "shanan")]
  pub window: String,
  /// 每行一帧的 JSON 检测结果
  #[arg(long, value_name = "FILE")]
  pub detections: Option<PathBuf>,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,

  #[arg(long, value_name = "COUNT", default_value_t = 10)]
  pub max_transient_failures: u32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("显示目标: {}", args.output);

  let mut input = InputWrapper::from_url(&args.input)?;
  let requests = input.init_requests();
  initialize_first(&mut input, &requests)?;

  let surface = SurfaceWrapper::from_url(&args.output)?;
  let mut sink = AnnotatedDisplaySink::new(args.window, Annotator::new()?, surface);

  let task = ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_max_transient_failures(args.max_transient_failures);

  let stop = task.stop_flag();
  ctrlc::set_handler(move || {
    warn!("收到中断信号，准备退出...");
    stop.store(true, Ordering::Relaxed);
  })?;

  let report = match args.detections {
    Some(path) => {
      info!("检测结果来源: {}", path.display());
      let mut provider = JsonLinesDetections::new(BufReader::new(File::open(path)?));
      task.run_task(&mut input, &mut provider, &mut sink)?
    }
    None => task.run_task(&mut input, &mut NoDetections, &mut sink)?,
  };

  info!("共显示 {} 帧，{} 个检测结果", report.frames, report.detections);
  Ok(())
}
