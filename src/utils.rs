// CamVault - 工具函数模块
// 提供路径处理、扩展名规范化、格式化等辅助功能

use directories::BaseDirs;
use std::path::{Path, PathBuf};

/// 展开路径开头的 `~`
///
/// 配置文件中的目录通常写成 `~/Downloads/...`，
/// 无法确定主目录时原样返回。
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}

/// 规范化扩展名：去掉前导的 `.` 并转为小写
///
/// `".JPG"`、`"jpg"`、`"Jpg"` 都得到 `"jpg"`。
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// 取设备路径（`/` 分隔）的文件名部分
pub fn remote_file_name(remote_path: &str) -> &str {
    remote_path.rsplit('/').next().unwrap_or(remote_path)
}

/// 取文件名的小写扩展名（不含 `.`），没有扩展名时返回 `None`
///
/// 以 `.` 开头且没有其他 `.` 的隐藏文件（如 `.cache`）视为没有扩展名。
pub fn lowercase_extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// 拼接设备上的目录和文件名
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// 格式化字节数为人类可读的单位
///
/// # 示例
/// ```
/// # use camvault::utils::format_bytes;
/// assert_eq!(format_bytes(1024), "1.00 KB");
/// assert_eq!(format_bytes(500), "500 B");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// 格式化秒数为 "Xh Ym Zs" / "Xm Ys" / "Xs"
pub fn format_duration(secs: u64) -> String {
    if secs >= 3600 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;
        format!("{}h {}m {}s", hours, mins, secs)
    } else if secs >= 60 {
        let mins = secs / 60;
        let secs = secs % 60;
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
