// src/cli/send.rs
//! Send 命令 - 同步处理一条通知（调试用）

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::bootstrap::Bootstrap;
use super::output::{describe, format_json};
use crate::config::TransportMode;
use crate::event::NotificationEvent;

/// Send 命令参数
#[derive(Args)]
pub struct SendArgs {
    /// 来源应用包名
    #[arg(long, short)]
    pub package: String,

    /// 通知标题
    #[arg(long, short = 'T', default_value = "")]
    pub title: String,

    /// 通知正文
    #[arg(long, short = 'x')]
    pub text: String,

    /// 扩展文本（优先于正文）
    #[arg(long)]
    pub big_text: Option<String>,

    /// 覆盖配置中的传输方式
    #[arg(long, short, value_enum)]
    pub transport: Option<TransportMode>,

    /// 输出 JSON 格式
    #[arg(long)]
    pub json: bool,
}

/// Send 命令输出
#[derive(Debug, Serialize)]
pub struct SendOutput {
    pub disposition: String,
    pub destination: String,
    pub detail: String,
}

/// 处理 send 命令
pub async fn handle_send(args: SendArgs) -> Result<()> {
    let boot = Bootstrap::new();
    boot.init_diagnostics();

    let config = boot.transport_config(args.transport);
    let dispatcher = boot.dispatcher(&config)?;

    let mut event = NotificationEvent::new(args.package, args.title, args.text)
        .with_post_time(chrono::Utc::now().timestamp_millis());
    if let Some(big_text) = args.big_text {
        event = event.with_big_text(big_text);
    }

    let result = dispatcher.process(&event).await;
    dispatcher.transport().disconnect().await;
    let disposition = result?;

    let destination = dispatcher.transport().destination();
    let detail = describe(&disposition, &destination);
    if args.json {
        let output = SendOutput {
            disposition: disposition.to_string(),
            destination,
            detail,
        };
        println!("{}", format_json(&output));
    } else {
        println!("{}", detail);
    }
    Ok(())
}
