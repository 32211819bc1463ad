//! # Skycam CLI
//!
//! 采集核心的命令行外壳（One-shot：连接 → 执行 → 断开）。
//!
//! ```bash
//! # 生成默认配置
//! skycam-cli config init
//!
//! # 使用模拟相机拍一张照片
//! skycam-cli --simulate snapshot
//!
//! # 30 秒视频预览（每秒刷新 preview.jpg）
//! skycam-cli stream --duration 30
//!
//! # 20 帧序列，间隔 5 秒，Ctrl-C 取消
//! skycam-cli --gain 120 --exposure-us 2000000 sequence -n 20 --interval-ms 5000
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod utils;

use commands::{ConfigCommand, SequenceCommand, SnapshotCommand, StatusCommand, StreamCommand};
use utils::CameraArgs;

/// Skycam CLI - 天文相机采集工具
#[derive(Parser, Debug)]
#[command(name = "skycam-cli")]
#[command(about = "Command-line interface for skycam acquisition", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    camera: CameraArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 拍摄一张照片
    Snapshot {
        #[command(flatten)]
        args: SnapshotCommand,
    },

    /// 视频流预览
    Stream {
        #[command(flatten)]
        args: StreamCommand,
    },

    /// 序列拍摄
    Sequence {
        #[command(flatten)]
        args: SequenceCommand,
    },

    /// 相机状态
    Status {
        #[command(flatten)]
        args: StatusCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("skycam_cli=info,skycam_driver=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config(cmd) => cmd.execute(&cli.camera),
        Commands::Snapshot { args } => args.execute(&cli.camera),
        Commands::Stream { args } => args.execute(&cli.camera),
        Commands::Sequence { args } => args.execute(&cli.camera),
        Commands::Status { args } => args.execute(&cli.camera),
    }
}
