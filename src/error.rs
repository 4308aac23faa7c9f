// CamVault - 错误类型模块
// 定义设备访问错误和备份运行的致命错误

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// 设备访问错误
///
/// 由 [`crate::device::Device`] 的实现返回。
#[derive(Debug, Error)]
pub enum DeviceError {
    /// 尚未调用 `connect`
    #[error("Device not connected")]
    NotConnected,

    /// 无法建立连接（设备未挂载、被锁定或不可达）
    #[error("Failed to connect to device at {location}: {reason}")]
    Connection { location: String, reason: String },

    /// 设备上不存在该路径
    #[error("Path not found on device: {0}")]
    NotFound(String),

    /// 单个路径的读取 / stat / 列目录失败
    #[error("Transport error on {path}: {source}")]
    Transport {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl DeviceError {
    pub fn transport(path: impl Into<String>, source: io::Error) -> Self {
        Self::Transport {
            path: path.into(),
            source,
        }
    }
}

/// 会中止整次备份的错误
///
/// 其他所有错误都只计入 [`crate::actions::BackupStats::errors`]。
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Device connection failed: {0}")]
    Connection(#[source] DeviceError),

    #[error("Backup destination {path:?} is not usable: {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
