// CamVault - 备份候选文件与处理结果定义
// 定义了备份过程中的候选文件、单个文件的处理结果和统计信息

use crate::date_resolver::DateSource;
use crate::utils::{lowercase_extension, remote_file_name};
use std::path::PathBuf;

/// 候选文件
/// 扫描器在设备上发现、尚未确认需要备份的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    /// 设备上的完整路径（`/` 分隔）
    pub source_path: String,

    /// 小写扩展名（不含 `.`），仅用于照片 / 视频分类
    pub extension: String,
}

impl CandidateFile {
    /// 从设备路径创建候选文件，没有扩展名时返回 `None`
    pub fn from_path(source_path: impl Into<String>) -> Option<Self> {
        let source_path = source_path.into();
        let extension = lowercase_extension(remote_file_name(&source_path))?;
        Some(Self {
            source_path,
            extension,
        })
    }

    /// 原始文件名
    pub fn file_name(&self) -> &str {
        remote_file_name(&self.source_path)
    }
}

/// 单个候选文件的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// 新文件，已写入目标路径
    BackedUp {
        destination: PathBuf,
        bytes: u64,
        date_source: DateSource,
    },

    /// 目标路径被不同内容的文件占用，按冲突策略改名后写入
    Renamed { destination: PathBuf, bytes: u64 },

    /// 相同内容已经存在于备份目录中
    SkippedDuplicate { existing: PathBuf },

    /// 目标路径上已有同名文件
    SkippedExisting { destination: PathBuf },

    /// 执行阶段再次检查时被排除
    Excluded,
}

/// 备份统计信息结构体
/// 记录单次备份运行的各项统计数据，每次运行开始时清零
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackupStats {
    /// 扫描得到的候选文件数量
    pub total_candidates: u64,

    /// 新备份的文件数量（包含改名写入的文件）
    pub newly_backed_up: u64,

    /// 因目标路径已存在而跳过的数量
    pub skipped_existing_path: u64,

    /// 因内容重复而跳过的数量
    pub skipped_duplicate_content: u64,

    /// 失败的文件数量
    pub errors: u64,

    /// 执行阶段被排除的数量
    pub excluded: u64,

    /// 因同名冲突改名写入的数量（已计入 `newly_backed_up`）
    pub renamed: u64,

    /// 写入的总字节数
    pub bytes_copied: u64,

    /// 运行开始时清理掉的中断遗留临时文件数
    pub stale_temp_files_removed: u64,
}

impl BackupStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按处理结果更新计数
    pub fn record(&mut self, outcome: &BackupOutcome) {
        match outcome {
            BackupOutcome::BackedUp { bytes, .. } => {
                self.newly_backed_up += 1;
                self.bytes_copied += bytes;
            }
            BackupOutcome::Renamed { bytes, .. } => {
                self.newly_backed_up += 1;
                self.renamed += 1;
                self.bytes_copied += bytes;
            }
            BackupOutcome::SkippedDuplicate { .. } => self.skipped_duplicate_content += 1,
            BackupOutcome::SkippedExisting { .. } => self.skipped_existing_path += 1,
            BackupOutcome::Excluded => self.excluded += 1,
        }
    }

    /// 所有候选文件都已跳过（没有新文件、没有错误）
    pub fn is_up_to_date(&self) -> bool {
        self.newly_backed_up == 0 && self.errors == 0
    }
}
