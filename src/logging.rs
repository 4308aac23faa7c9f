// CamVault - 日志初始化模块
// 终端输出到 stderr（不干扰进度条），可选地同时写入日志文件

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// 初始化全局日志
///
/// 过滤规则优先级：`RUST_LOG` > `-v`（debug）> 配置文件中的级别。
///
/// # 参数
/// * `level` - 配置文件中的日志级别
/// * `verbose` - 命令行 `-v`
/// * `file` - 日志文件路径，`None` 时只输出到终端
///
/// # 返回
/// * `Ok(Some(WorkerGuard))` - 写文件时的后台线程守卫，必须保持到程序结束
/// * `Err(anyhow::Error)` - 日志级别无效或日志已经初始化
pub fn init_logging(level: &str, verbose: bool, file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let level = if verbose { "debug" } else { level };
            EnvFilter::try_new(format!("camvault={}", level))
                .with_context(|| format!("Invalid log level {:?}", level))?
        }
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    let (file_layer, guard) = match file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Log file {:?} has no file name", path))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {:?}", dir))?;

            let appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Logging already initialized")?;

    Ok(guard)
}
