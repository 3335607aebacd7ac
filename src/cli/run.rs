// src/cli/run.rs
//! Run 命令 - 常驻转发服务
//!
//! 从 stdin（或 `--input` 文件）逐行读取 JSON 通知并提交给服务，
//! 输入结束或 Ctrl-C 时优雅退出。

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use super::bootstrap::Bootstrap;
use crate::config::TransportMode;
use crate::diagnostics;
use crate::event::NotificationEvent;
use crate::service::{InstanceLock, RelayService, ServiceOptions, DEFAULT_WORKERS};

/// Run 命令参数
#[derive(Args)]
pub struct RunArgs {
    /// 通知输入文件（每行一个 JSON），默认读取 stdin
    #[arg(long, short)]
    pub input: Option<PathBuf>,

    /// 覆盖配置中的传输方式
    #[arg(long, short, value_enum)]
    pub transport: Option<TransportMode>,

    /// 并发处理数
    #[arg(long, short, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,
}

/// 解析一行输入；`postTime` 缺失时使用当前时间
pub fn parse_event(line: &str) -> Result<NotificationEvent> {
    let mut event: NotificationEvent = serde_json::from_str(line)?;
    if event.post_time == 0 {
        event.post_time = chrono::Utc::now().timestamp_millis();
    }
    Ok(event)
}

/// 处理 run 命令
pub async fn handle_run(args: RunArgs) -> Result<()> {
    let boot = Bootstrap::new();
    boot.init_diagnostics();

    let lock = InstanceLock::acquire(InstanceLock::default_path(boot.data_dir()))?;
    let config = boot.transport_config(args.transport);
    let dispatcher = boot.dispatcher(&config)?;

    let options = ServiceOptions {
        workers: args.workers,
        keep_alive: config.mode == TransportMode::Mqtt,
        ..Default::default()
    };
    let service = RelayService::new(Arc::new(dispatcher), options).with_instance_lock(lock);
    service.start();

    println!(
        "转发服务已启动: {} -> {}",
        config.mode,
        service.dispatcher().transport().destination()
    );

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
        Some(path) => Box::new(BufReader::new(tokio::fs::File::open(path).await?)),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let (accepted, skipped) = pump(reader, &service).await;

    service.shutdown().await;
    println!("转发服务已停止: 接收 {} 条，跳过 {} 行无效输入", accepted, skipped);
    Ok(())
}

/// 读取输入直到结束或收到中断信号
async fn pump(
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    service: &RelayService,
) -> (usize, usize) {
    let mut lines = reader.lines();
    let mut accepted = 0;
    let mut skipped = 0;

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            _ = &mut interrupt => {
                info!("Interrupted, shutting down relay service");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match parse_event(&line) {
                        Ok(event) => {
                            if service.submit(event) {
                                accepted += 1;
                            }
                        }
                        Err(e) => {
                            skipped += 1;
                            warn!(error = %e, "Skipping malformed notification line");
                            diagnostics::log(format!("Invalid notification input: {}", e));
                        }
                    },
                    Ok(None) => {
                        info!("Input closed, shutting down relay service");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to read notification input");
                        break;
                    }
                }
            }
        }
    }

    (accepted, skipped)
}
