// 该文件是 Huafeng （画风） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::{thread, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use huafeng::{
  dispatch::CancelToken,
  input::ImageFileInput,
  model::CandleBackend,
  output::SaveImageFileOutput,
  task::{StyleTransferTask, Task},
};

/// 中断后等待正在运行的任务结束的最长时间
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

fn main() -> Result<()> {
  let args = args::Args::parse();

  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_max_level(args.log_level())
    .init();

  let styles = args.styles();
  let config = args.execution_config();
  info!("输入图像: {}", args.image.display());
  info!("风格数量: {}", styles.len());
  info!("推理设备: {}", config.device);
  info!("工作线程: {}", config.workers);

  let cancel = CancelToken::new();
  let token = cancel.clone();
  ctrlc::set_handler(move || {
    if token.interrupt() {
      warn!("再次收到中断信号，立即退出");
      std::process::exit(1);
    }
    warn!("收到中断信号，尚未开始的任务将被取消...");
    thread::spawn(|| {
      thread::sleep(FORCE_EXIT_AFTER);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  let total = styles.len();
  let mut task = StyleTransferTask::new(&args.image, styles)
    .with_config(config)
    .with_target_size(args.target_size)
    .with_extension(&args.extension)
    .with_cancel_token(cancel);
  if let Some(path) = &args.graph {
    info!("网络结构描述: {}", path.display());
    task = task.with_descriptor_file(path);
  }
  let report = task.run_task(ImageFileInput, &CandleBackend, SaveImageFileOutput)?;

  for (id, style, path) in &report.written {
    info!("[{}] {} -> {}", id, style, path.display());
  }
  for (index, e) in &report.load_failures {
    warn!("[{}] 跳过: {}", index, e);
  }
  for (id, style, e) in &report.job_failures {
    error!("[{}] {} 失败: {}", id, style, e);
  }
  info!("处理完成: {}/{} 个风格成功", report.written.len(), total);

  Ok(())
}
