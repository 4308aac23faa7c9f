// CamVault - 备份执行器模块
// 串联扫描、去重、日期解析和写入，完成一次可中断、可重复执行的备份

use crate::actions::{BackupOutcome, BackupStats, CandidateFile};
use crate::config::BackupConfig;
use crate::date_resolver::{CaptureDateResolver, ResolvedDate};
use crate::device::Device;
use crate::error::BackupError;
use crate::fingerprint::FingerprintIndex;
use crate::metadata::{ExifExtractor, MetadataExtractor};
use crate::progress::{NoopObserver, ProgressEvent, ProgressObserver};
use crate::scanner::SourceScanner;
use crate::store::NameConflictPolicy;
use anyhow::{Context, Result};
use chrono::{Datelike, Local, NaiveDateTime, TimeZone};
use filetime::FileTime;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 临时文件的前缀和后缀，扩展名不属于媒体文件，不会被指纹索引收录
const TEMP_PREFIX: &str = ".camvault-";
const TEMP_SUFFIX: &str = ".partial";

/// 计算备份目标路径：`<root>/<YYYY>/<YYYY-MM-DD>/<文件名>`
///
/// 年份和日期都来自拍摄日期，而不是扫描时间。
///
/// # 示例
/// ```
/// # use camvault::executor::destination_path;
/// # use chrono::NaiveDate;
/// # use std::path::Path;
/// let taken = NaiveDate::from_ymd_opt(2023, 12, 25).unwrap().and_hms_opt(15, 30, 45).unwrap();
/// let dest = destination_path(Path::new("/backup"), "/DCIM/100APPLE/IMG_001.jpg", taken);
/// assert_eq!(dest, Path::new("/backup/2023/2023-12-25/IMG_001.jpg"));
/// ```
pub fn destination_path(root: &Path, source_path: &str, taken: NaiveDateTime) -> PathBuf {
    let file_name = crate::utils::remote_file_name(source_path);
    root.join(format!("{:04}", taken.year()))
        .join(taken.format("%Y-%m-%d").to_string())
        .join(file_name)
}

/// 同名冲突时的候选路径：`IMG_001 (1).jpg`、`IMG_001 (2).jpg`...
fn numbered_path(path: &Path, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{} ({})", stem, n),
    };
    path.with_file_name(name)
}

/// 原子写入的结果
enum WriteResult {
    Written,
    /// 目标路径在写入期间被占用
    AlreadyExists,
}

/// 备份执行器
///
/// 设备访问严格串行：候选文件按扫描顺序逐个处理，每个文件只从设备读取一次。
/// 每个备份目录对应一个指纹索引，不在不同目录之间共享。
pub struct BackupExecutor<D: Device> {
    config: BackupConfig,
    device: D,
    resolver: CaptureDateResolver,
    index: FingerprintIndex,
    observer: Box<dyn ProgressObserver>,
    stats: BackupStats,
}

impl<D: Device> BackupExecutor<D> {
    /// 创建新的备份执行器
    ///
    /// 默认使用 EXIF 读取拍摄日期，不输出进度。
    pub fn new(config: BackupConfig, device: D) -> Self {
        let index = FingerprintIndex::new(
            config.backup_directory.clone(),
            config.media_extensions.clone(),
        );
        Self {
            config,
            device,
            resolver: CaptureDateResolver::new(ExifExtractor),
            index,
            observer: Box::new(NoopObserver),
            stats: BackupStats::new(),
        }
    }

    pub fn with_extractor(mut self, extractor: impl MetadataExtractor + 'static) -> Self {
        self.resolver = CaptureDateResolver::new(extractor);
        self
    }

    pub fn with_observer(mut self, observer: impl ProgressObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn index(&self) -> &FingerprintIndex {
        &self.index
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// 最近一次运行的统计信息
    pub fn stats(&self) -> &BackupStats {
        &self.stats
    }

    /// 执行一次完整备份
    ///
    /// # 返回
    /// * `Ok(BackupStats)` - 运行完成（`errors` 非零也算完成）
    /// * `Err(BackupError)` - 无法连接设备或备份目录不可用
    ///
    /// # 流程
    /// 1. 连接设备
    /// 2. 创建备份根目录，清理中断运行遗留的临时文件
    /// 3. 扫描候选文件并构建指纹索引
    /// 4. 逐个处理候选文件，单个文件的错误只计数，不中断运行
    pub fn run_backup(&mut self) -> Result<BackupStats, BackupError> {
        self.stats = BackupStats::new();

        let info = self.device.connect().map_err(BackupError::Connection)?;
        debug!(device = %info.name, "Starting backup into {:?}", self.config.backup_directory);

        let destination_error = |source: io::Error| BackupError::Destination {
            path: self.config.backup_directory.clone(),
            source,
        };
        fs::create_dir_all(&self.config.backup_directory).map_err(destination_error)?;
        // 备份根目录必须可写，探测文件随即删除
        tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.config.backup_directory)
            .map_err(destination_error)?;
        self.stats.stale_temp_files_removed = remove_stale_temp_files(&self.config.backup_directory);

        let candidates = SourceScanner::new(&self.config).scan(&self.device, self.observer.as_ref());
        self.stats.total_candidates = candidates.len() as u64;

        if candidates.is_empty() {
            info!("No photos found on device");
            return Ok(self.stats.clone());
        }

        let report = self.index.ensure_built();
        self.observer.on_progress(&ProgressEvent::IndexReady {
            files: self.index.stats().file_count,
            unreadable: report.unreadable,
        });

        let total = candidates.len();
        for (i, candidate) in candidates.iter().enumerate() {
            self.observer.on_progress(&ProgressEvent::Processing {
                index: i + 1,
                total,
                path: candidate.source_path.clone(),
            });

            match self.process_candidate(candidate) {
                Ok(outcome) => {
                    self.stats.record(&outcome);
                    self.report_outcome(candidate, &outcome);
                }
                Err(e) => {
                    warn!("Failed to backup {}: {:#}", candidate.source_path, e);
                    self.stats.errors += 1;
                    self.observer.on_progress(&ProgressEvent::Failed {
                        path: candidate.source_path.clone(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        debug!(
            total = self.stats.total_candidates,
            backed_up = self.stats.newly_backed_up,
            duplicates = self.stats.skipped_duplicate_content,
            existing = self.stats.skipped_existing_path,
            errors = self.stats.errors,
            "Backup run finished"
        );
        Ok(self.stats.clone())
    }

    /// 处理单个候选文件
    ///
    /// # 决策逻辑
    /// 1. **排除**：再次检查排除策略（配置可能在扫描后发生变化）
    /// 2. **读取**：从设备读取一次，后续去重和写入都使用同一份数据
    /// 3. **去重**：内容哈希已存在则跳过
    /// 4. **日期**：解析拍摄日期，计算目标路径
    /// 5. **同名**：目标路径已存在时按冲突策略跳过或改名
    /// 6. **写入**：临时文件 + 不覆盖的重命名，然后记录到指纹索引
    fn process_candidate(&self, candidate: &CandidateFile) -> Result<BackupOutcome> {
        let source = candidate.source_path.as_str();

        if self.config.exclusion.should_exclude(source) {
            return Ok(BackupOutcome::Excluded);
        }

        let bytes = self
            .device
            .read_file(source)
            .with_context(|| format!("Failed to read {} from device", source))?;

        let check = self.index.check_duplicate(&bytes);
        if let Some(existing) = check.existing {
            return Ok(BackupOutcome::SkippedDuplicate {
                existing: existing.destination_path,
            });
        }

        let resolved = self.resolver.resolve_with_bytes(source, &bytes, &self.device);
        if resolved.is_fallback() {
            self.observer.on_progress(&ProgressEvent::DateFallback {
                path: source.to_string(),
            });
        }

        let primary = destination_path(&self.config.backup_directory, source, resolved.taken);
        let size = bytes.len() as u64;

        let (destination, renamed) = if primary.exists() {
            match self.config.name_conflict {
                NameConflictPolicy::Skip => {
                    debug!("Skipping existing: {:?}", primary);
                    return Ok(BackupOutcome::SkippedExisting {
                        destination: primary,
                    });
                }
                NameConflictPolicy::Rename => (self.free_numbered_path(&primary), true),
            }
        } else {
            (primary, false)
        };

        match write_atomically(&destination, &bytes, &resolved)? {
            WriteResult::AlreadyExists => Ok(BackupOutcome::SkippedExisting { destination }),
            WriteResult::Written => {
                self.index.record_hashed(&destination, check.hash, size);
                if renamed {
                    Ok(BackupOutcome::Renamed {
                        destination,
                        bytes: size,
                    })
                } else {
                    Ok(BackupOutcome::BackedUp {
                        destination,
                        bytes: size,
                        date_source: resolved.source,
                    })
                }
            }
        }
    }

    fn free_numbered_path(&self, primary: &Path) -> PathBuf {
        let mut n = 1;
        loop {
            let candidate = numbered_path(primary, n);
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }

    fn report_outcome(&self, candidate: &CandidateFile, outcome: &BackupOutcome) {
        let path = candidate.source_path.clone();
        let event = match outcome {
            BackupOutcome::BackedUp {
                destination,
                bytes,
                date_source,
            } => {
                debug!("Backed up {} -> {:?}", path, destination);
                ProgressEvent::BackedUp {
                    path,
                    destination: destination.clone(),
                    bytes: *bytes,
                    date_source: *date_source,
                }
            }
            BackupOutcome::Renamed { destination, .. } => {
                debug!("Name taken by different content, saved {} as {:?}", path, destination);
                ProgressEvent::Renamed {
                    path,
                    destination: destination.clone(),
                }
            }
            BackupOutcome::SkippedDuplicate { existing } => {
                debug!("Duplicate content: {} already backed up as {:?}", path, existing);
                ProgressEvent::SkippedDuplicate {
                    path,
                    existing: existing.clone(),
                }
            }
            BackupOutcome::SkippedExisting { destination } => ProgressEvent::SkippedExisting {
                path,
                destination: destination.clone(),
            },
            BackupOutcome::Excluded => ProgressEvent::Excluded { path },
        };
        self.observer.on_progress(&event);
    }
}

/// 删除上次运行被强制中断时遗留的临时文件
///
/// 返回删除的文件数，删除失败只记警告。
pub fn remove_stale_temp_files(root: &Path) -> u64 {
    let mut removed = 0;
    let stale = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX))
        });
    for entry in stale {
        match fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!("Removed stale temp file {:?}", entry.path());
                removed += 1;
            }
            Err(e) => warn!("Could not remove stale temp file {:?}: {}", entry.path(), e),
        }
    }
    removed
}

/// 原子写入文件
///
/// 先在目标目录写入临时文件并同步到磁盘，把修改时间设为拍摄时间，
/// 再以不覆盖的方式重命名到最终路径。中断时最终路径上不会出现半个文件。
fn write_atomically(destination: &Path, bytes: &[u8], resolved: &ResolvedDate) -> Result<WriteResult> {
    let parent = destination
        .parent()
        .with_context(|| format!("Destination {:?} has no parent directory", destination))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create parent dir for {:?}", destination))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(parent)
        .with_context(|| format!("Failed to create temp file in {:?}", parent))?;
    tmp.write_all(bytes)
        .with_context(|| format!("Failed to write temp file for {:?}", destination))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("Failed to sync temp file for {:?}", destination))?;

    if let Some(taken) = Local.from_local_datetime(&resolved.taken).earliest() {
        let mtime = FileTime::from_unix_time(taken.timestamp(), 0);
        if let Err(e) = filetime::set_file_mtime(tmp.path(), mtime) {
            debug!("Could not set modification time for {:?}: {}", destination, e);
        }
    }

    match tmp.persist_noclobber(destination) {
        Ok(_) => Ok(WriteResult::Written),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(WriteResult::AlreadyExists),
        Err(e) => Err(e.error).with_context(|| format!("Failed to move file into {:?}", destination)),
    }
}
