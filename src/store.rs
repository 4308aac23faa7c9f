// CamVault - 配置文件存储模块
// 负责用户配置文件（config.toml）的加载和保存

use anyhow::{Context, Result};
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// 同名不同内容时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameConflictPolicy {
    /// 保留已有文件，跳过新文件
    #[default]
    Skip,
    /// 以 `name (1).ext` 的形式另存
    Rename,
}

/// `[backup]` 配置段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSection {
    /// 备份根目录，支持 `~`
    pub directory: PathBuf,

    /// 设备上要扫描的根目录
    pub source_roots: Vec<String>,

    /// 同名冲突策略
    pub on_name_conflict: NameConflictPolicy,
}

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            directory: default_backup_directory(),
            source_roots: vec!["/DCIM".to_string()],
            on_name_conflict: NameConflictPolicy::Skip,
        }
    }
}

/// `[files]` 配置段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesSection {
    pub photo_extensions: Vec<String>,
    pub video_extensions: Vec<String>,

    /// 精确排除的设备路径
    pub exclude_files: Vec<String>,

    /// 排除模式（Glob 风格，匹配完整路径）
    pub exclude_patterns: Vec<String>,
}

impl Default for FilesSection {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            photo_extensions: owned(&[
                ".jpg", ".jpeg", ".png", ".heic", ".gif", ".tiff", ".bmp", ".dng", ".raw",
                ".cr2", ".nef",
            ]),
            video_extensions: owned(&[".mov", ".mp4", ".m4v", ".avi", ".mkv"]),
            exclude_files: Vec::new(),
            exclude_patterns: owned(&[
                "*/Thumbnails/*",
                "*/Cache/*",
                "*/Metadata/*",
                "*.tmp",
                "*.cache",
            ]),
        }
    }
}

/// `[logging]` 配置段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// 日志级别（`RUST_LOG` 优先）
    pub level: String,

    /// 日志文件，未设置时只输出到终端
    pub file: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// 已保存的设备
///
/// 定义一台设备的挂载点，以及可选的专用备份目录。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// 设备的挂载目录
    pub mount_point: PathBuf,

    /// 覆盖 `[backup] directory`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_directory: Option<PathBuf>,
}

/// 应用程序全局配置
///
/// 所有配置段都可以省略，缺失的键使用默认值。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backup: BackupSection,
    pub files: FilesSection,
    pub logging: LoggingSection,

    /// 设备配置，键为设备名称
    pub devices: BTreeMap<String, DeviceProfile>,
}

impl AppConfig {
    /// 从默认位置加载配置
    ///
    /// # 返回
    /// * `Ok(AppConfig)` - 加载的配置，如果文件不存在则返回默认配置
    /// * `Err(anyhow::Error)` - 如果配置文件存在但解析失败
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    /// 从指定文件加载配置，文件不存在时返回默认配置
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file {:?}", path))
    }

    /// 保存配置到指定文件
    ///
    /// 如果配置目录不存在，会自动创建。
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).context("Failed to write config file")
    }

    /// 配置文件的默认路径
    ///
    /// 使用 `directories` crate 获取平台标准的配置目录：
    /// - Windows: `C:\Users\<用户>\AppData\Roaming\camvault\config.toml`
    /// - macOS: `~/Library/Application Support/camvault/config.toml`
    /// - Linux: `~/.config/camvault/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", "camvault")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }
}

/// 默认备份目录：下载目录下的 `PhotoBackup`
fn default_backup_directory() -> PathBuf {
    UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(|d| d.join("PhotoBackup")))
        .unwrap_or_else(|| PathBuf::from("~/Downloads/PhotoBackup"))
}
