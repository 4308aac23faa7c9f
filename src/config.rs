// CamVault - 备份配置管理模块
// 把配置文件和命令行参数合并为单次备份使用的配置

use crate::exclusion::ExclusionPolicy;
use crate::store::{AppConfig, FilesSection, NameConflictPolicy};
use crate::utils::{expand_tilde, normalize_extension};
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// 命令行对配置文件的覆盖项
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// 备份目录
    pub backup_directory: Option<PathBuf>,

    /// 额外的排除模式
    pub exclude_patterns: Vec<String>,
}

/// 备份配置结构体
///
/// 单次备份运行所需的全部参数，排除模式已编译。
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// 备份根目录
    pub backup_directory: PathBuf,

    /// 照片和视频扩展名（小写，不含 `.`）
    pub media_extensions: BTreeSet<String>,

    /// 排除策略
    pub exclusion: ExclusionPolicy,

    /// 设备上要扫描的根目录
    pub source_roots: Vec<String>,

    /// 同名冲突策略
    pub name_conflict: NameConflictPolicy,
}

impl BackupConfig {
    /// 从配置文件和覆盖项生成备份配置
    ///
    /// # 参数
    /// * `app` - 已加载的配置文件
    /// * `overrides` - 命令行覆盖项
    ///
    /// # 返回
    /// * `Err(anyhow::Error)` - 排除模式语法错误
    pub fn resolve(app: &AppConfig, overrides: &Overrides) -> Result<Self> {
        let directory = overrides
            .backup_directory
            .clone()
            .unwrap_or_else(|| app.backup.directory.clone());

        let mut patterns = app.files.exclude_patterns.clone();
        for extra in &overrides.exclude_patterns {
            // 避免重复添加
            if !patterns.contains(extra) {
                patterns.push(extra.clone());
            }
        }

        let exclusion = ExclusionPolicy::new(app.files.exclude_files.iter().cloned(), &patterns)
            .context("Invalid exclude pattern in configuration")?;

        Ok(Self {
            backup_directory: expand_tilde(&directory),
            media_extensions: media_extensions(&app.files),
            exclusion,
            source_roots: app.backup.source_roots.clone(),
            name_conflict: app.backup.on_name_conflict,
        })
    }

    /// 使用默认设置和指定的备份目录
    pub fn with_defaults(backup_directory: impl Into<PathBuf>) -> Self {
        let files = FilesSection::default();
        Self {
            backup_directory: backup_directory.into(),
            media_extensions: media_extensions(&files),
            // 内置模式都是合法的
            exclusion: ExclusionPolicy::new(files.exclude_files, &files.exclude_patterns)
                .unwrap_or_default(),
            source_roots: vec!["/DCIM".to_string()],
            name_conflict: NameConflictPolicy::Skip,
        }
    }

    pub fn is_media_extension(&self, ext: &str) -> bool {
        self.media_extensions.contains(ext)
    }
}

fn media_extensions(files: &FilesSection) -> BTreeSet<String> {
    files
        .photo_extensions
        .iter()
        .chain(&files.video_extensions)
        .map(|e| normalize_extension(e))
        .filter(|e| !e.is_empty())
        .collect()
}
