//! 配置管理命令

use crate::utils::CameraArgs;
use anyhow::{Context, Result, bail};
use clap::Subcommand;
use skycam_tools::ServiceConfig;

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 显示生效的配置（文件 + 默认值 + 命令行覆盖）
    Show,

    /// 写入默认配置文件
    Init {
        /// 覆盖已有文件
        #[arg(long)]
        force: bool,
    },

    /// 显示配置文件路径
    Path,
}

impl ConfigCommand {
    pub fn execute(self, args: &CameraArgs) -> Result<()> {
        match self {
            ConfigCommand::Show => {
                let config = args.load_config()?;
                print!("{}", config.to_toml()?);
                Ok(())
            },
            ConfigCommand::Init { force } => {
                let path = args.config_path()?;
                if path.exists() && !force {
                    bail!("{} 已存在（使用 --force 覆盖）", path.display());
                }
                ServiceConfig::default()
                    .save(&path)
                    .with_context(|| format!("写入配置失败: {}", path.display()))?;
                println!("✅ 已写入默认配置: {}", path.display());
                Ok(())
            },
            ConfigCommand::Path => {
                println!("{}", args.config_path()?.display());
                Ok(())
            },
        }
    }
}
