//! beecode - 本地项目编程助手
//!
//! 入口：初始化日志、加载配置、创建 Agent，并运行交互循环。
//! 用法：beecode [配置文件路径]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use beecode::{config::load_config, create_agent, observability, ui::TerminalUi};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;

    let mut agent =
        create_agent(&cfg, Arc::new(TerminalUi::new())).context("Failed to create agent")?;

    agent.run().await;
    Ok(())
}
