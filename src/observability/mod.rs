//! 可观测性：tracing 订阅器
//!
//! 日志写 stderr，交互终端的 stdout 只留给对话输出；默认级别 info，RUST_LOG 可覆盖。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}
