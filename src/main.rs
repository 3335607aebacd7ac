//! Payment Relay CLI
//!
//! 把付款通知转发到 MQTT broker 或 HTTP 收集端

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};
use payment_relay::cli::{
    format_archive, format_history, format_json, handle_run, handle_send, Bootstrap, RunArgs,
    SendArgs, Toggle,
};
use payment_relay::diagnostics;
use payment_relay::transport::HttpTransport;
use payment_relay::SettingsSource;

#[derive(Parser)]
#[command(name = "payrelay")]
#[command(about = "Payment Relay - 付款通知转发")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 启动转发服务（从 stdin 读取通知）
    Run(RunArgs),
    /// 处理一条通知并输出结果
    Send(SendArgs),
    /// 查看发送记录
    History {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
        /// 清空记录
        #[arg(long)]
        clear: bool,
    },
    /// 查看收到的通知
    Archive {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
        /// 清空存档
        #[arg(long)]
        clear: bool,
    },
    /// 管理包名白名单
    Allow {
        #[command(subcommand)]
        action: AllowAction,
    },
    /// 开关包名过滤
    Filter {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// 开关全部转发（关闭后只转发像付款的通知）
    SendAll {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// 开关诊断日志
    Logging {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// 查看当前配置
    Config {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 检查 HTTP 收集端是否可达
    Check {
        /// 收集端地址（默认使用配置）
        #[arg(long)]
        host: Option<String>,
    },
    /// 查看诊断日志
    Logs {
        /// 显示最近 N 行
        #[arg(long, short = 'n', default_value = "50")]
        lines: usize,
    },
}

#[derive(Subcommand)]
enum AllowAction {
    /// 列出白名单
    List,
    /// 添加包名
    Add { package: String },
    /// 移除包名
    Remove { package: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 通过 RUST_LOG 环境变量控制日志级别，默认为 info
    // 例如: RUST_LOG=debug payrelay run
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("payment_relay=info,payrelay=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();
    let boot = Bootstrap::new();

    match cli.command {
        Commands::Run(args) => {
            handle_run(args).await?;
        }
        Commands::Send(args) => {
            handle_send(args).await?;
        }
        Commands::History { json, clear } => {
            let history = boot.open_history()?;
            if clear {
                history.clear()?;
                println!("已清空发送记录");
            } else if json {
                println!("{}", format_json(&history.get_all()));
            } else {
                println!("{}", format_history(&history.get_all()));
            }
        }
        Commands::Archive { json, clear } => {
            let archive = boot.open_archive()?;
            if clear {
                archive.clear()?;
                println!("已清空通知存档");
            } else if json {
                println!("{}", format_json(&archive.get_all()));
            } else {
                println!("{}", format_archive(&archive.get_all()));
            }
        }
        Commands::Allow { action } => match action {
            AllowAction::List => {
                let settings = boot.settings().load()?;
                if settings.filter.allowed_packages.is_empty() {
                    println!("白名单为空（过滤开启时不限制包名）");
                } else {
                    println!("白名单 {} 个包名:\n", settings.filter.allowed_packages.len());
                    for package in &settings.filter.allowed_packages {
                        println!("  {}", package);
                    }
                }
            }
            AllowAction::Add { package } => {
                let package = package.trim().to_string();
                if package.is_empty() {
                    anyhow::bail!("包名不能为空");
                }
                boot.settings().update(|s| {
                    s.filter.allowed_packages.insert(package.clone());
                })?;
                println!("已添加: {}", package);
            }
            AllowAction::Remove { package } => {
                let mut removed = false;
                boot.settings().update(|s| {
                    removed = s.filter.allowed_packages.remove(package.trim());
                })?;
                if removed {
                    println!("已移除: {}", package);
                } else {
                    eprintln!("白名单中没有 {}", package);
                }
            }
        },
        Commands::Filter { state } => {
            boot.settings().update(|s| s.filter.filter_enabled = state.is_on())?;
            println!("包名过滤已{}", state.label());
        }
        Commands::SendAll { state } => {
            boot.settings().update(|s| s.filter.send_all = state.is_on())?;
            println!("全部转发已{}", state.label());
        }
        Commands::Logging { state } => {
            boot.settings().update(|s| s.logging_enabled = state.is_on())?;
            println!("诊断日志已{}", state.label());
        }
        Commands::Config { json } => {
            let settings = boot.settings().load()?;
            if json {
                println!("{}", format_json(&settings));
            } else {
                let t = &settings.transport;
                println!("配置文件: {}", boot.settings().path().display());
                println!("  传输方式: {}", t.mode);
                println!("  MQTT broker: {}", t.broker);
                println!("  MQTT topic: {}", t.topic);
                println!("  MQTT client id: {}", t.client_id);
                println!("  HTTP 收集端: {}", t.server_host);
                println!("  最近连接状态: {}", if settings.mqtt_connected { "已连接" } else { "未连接" });
                println!("  包名过滤: {}", if settings.filter.filter_enabled { "开启" } else { "关闭" });
                println!("  白名单: {} 个包名", settings.filter.allowed_packages.len());
                println!("  全部转发: {}", if settings.filter.send_all { "开启" } else { "关闭" });
                println!("  诊断日志: {}", if settings.logging_enabled { "开启" } else { "关闭" });
            }
        }
        Commands::Check { host } => {
            boot.init_diagnostics();
            let host = host.unwrap_or_else(|| boot.settings().settings().transport.server_host);
            let client = HttpTransport::new(&host)?;
            match client.check_health().await {
                Ok(health) => {
                    diagnostics::log(format!("Health check OK: {}", health.status));
                    println!("收集端可达: {} (status: {})", host, health.status);
                }
                Err(e) => {
                    diagnostics::log(format!("Health check failed: {}", e));
                    eprintln!("收集端不可达: {} ({})", host, e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Logs { lines } => {
            let lines = diagnostics::tail_file(&boot.log_file(), lines)?;

            if lines.is_empty() {
                println!("暂无诊断日志");
            } else {
                for line in lines {
                    println!("{}", line);
                }
            }
        }
    }

    Ok(())
}
