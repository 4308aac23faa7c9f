// CamVault - 指纹索引模块
// 维护 "内容哈希 -> 已备份文件" 的缓存，通过遍历备份目录按需构建

use crate::hasher::{hash_bytes, hash_file, ContentHash};
use crate::utils::lowercase_extension;
use chrono::{DateTime, Local};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// 已备份文件的指纹
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    /// 备份目录中的绝对路径
    pub destination_path: PathBuf,

    /// 文件内容的 SHA-256
    pub content_hash: ContentHash,

    /// 文件字节数
    pub size_bytes: u64,

    /// 本地文件的修改时间，无法 stat 时为 `None`
    pub modified_at: Option<DateTime<Local>>,
}

impl FileFingerprint {
    fn new(destination_path: PathBuf, content_hash: ContentHash, size_bytes: u64) -> Self {
        let modified_at = fs::metadata(&destination_path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Local>::from);
        Self {
            destination_path,
            content_hash,
            size_bytes,
            modified_at,
        }
    }
}

/// 重复检查的结果
#[derive(Debug, Clone)]
pub struct DuplicateCheck {
    /// 被检查内容的哈希，写入后可直接用于 [`FingerprintIndex::record_hashed`]
    pub hash: ContentHash,

    /// 已存在的相同内容的文件
    pub existing: Option<FileFingerprint>,
}

impl DuplicateCheck {
    pub fn is_duplicate(&self) -> bool {
        self.existing.is_some()
    }
}

/// 一次索引构建的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexBuildReport {
    /// 本次构建新加入的文件数，已构建时为 0
    pub indexed: usize,

    /// 无法读取而被跳过的文件数
    pub unreadable: usize,

    /// 本次调用是否真正遍历了备份目录
    pub walked: bool,

    /// 哈希相同但大小不同的文件数（数据完整性异常）
    pub collisions: usize,
}

/// 索引统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub file_count: usize,
    pub total_size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexState {
    Empty,
    Built,
}

#[derive(Debug)]
struct IndexInner {
    state: IndexState,
    entries: HashMap<ContentHash, FileFingerprint>,
}

/// 计算本地文件的哈希和大小
pub type FileHasher = fn(&Path) -> std::io::Result<(ContentHash, u64)>;

/// 指纹索引
///
/// 备份目录本身就是持久化的数据源，索引从不写入磁盘：
/// 第一次使用时遍历一遍备份目录（`Empty -> Built`），之后通过
/// [`record`](Self::record) 增量更新，直到 [`reset`](Self::reset)。
///
/// 构建过程全程持有互斥锁，并发调用者会等待构建完成而不是重复遍历。
pub struct FingerprintIndex {
    destination: PathBuf,
    media_extensions: BTreeSet<String>,
    file_hasher: FileHasher,
    inner: Mutex<IndexInner>,
}

impl std::fmt::Debug for FingerprintIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintIndex")
            .field("destination", &self.destination)
            .field("media_extensions", &self.media_extensions)
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl FingerprintIndex {
    /// 创建指纹索引
    ///
    /// # 参数
    /// * `destination` - 备份根目录
    /// * `media_extensions` - 参与索引的扩展名（小写，不含 `.`）
    pub fn new(destination: impl Into<PathBuf>, media_extensions: BTreeSet<String>) -> Self {
        Self {
            destination: destination.into(),
            media_extensions,
            file_hasher: hash_file,
            inner: Mutex::new(IndexInner {
                state: IndexState::Empty,
                entries: HashMap::new(),
            }),
        }
    }

    /// 替换构建索引时使用的文件哈希函数
    pub fn with_file_hasher(mut self, file_hasher: FileHasher) -> Self {
        self.file_hasher = file_hasher;
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn is_built(&self) -> bool {
        self.lock().state == IndexState::Built
    }

    /// 确保索引已构建
    ///
    /// 整个生命周期内（除非调用 `reset`）只遍历一次备份目录。
    /// 无法读取的文件只记警告并跳过：这只会导致漏判重复，不会误判。
    pub fn ensure_built(&self) -> IndexBuildReport {
        let mut inner = self.lock();
        self.build_locked(&mut inner)
    }

    /// 检查内容是否已经备份过
    ///
    /// 索引未构建时会先构建。
    pub fn check_duplicate(&self, content: &[u8]) -> DuplicateCheck {
        let hash = hash_bytes(content);
        let mut inner = self.lock();
        self.build_locked(&mut inner);
        DuplicateCheck {
            hash,
            existing: inner.entries.get(&hash).cloned(),
        }
    }

    /// 记录一个刚写入的文件
    pub fn record(&self, destination_path: impl Into<PathBuf>, content: &[u8]) -> FileFingerprint {
        self.record_hashed(destination_path, hash_bytes(content), content.len() as u64)
    }

    /// 使用已计算好的哈希记录一个文件
    pub fn record_hashed(
        &self,
        destination_path: impl Into<PathBuf>,
        hash: ContentHash,
        size_bytes: u64,
    ) -> FileFingerprint {
        let fingerprint = FileFingerprint::new(destination_path.into(), hash, size_bytes);
        let mut inner = self.lock();
        if let Some(previous) = inner.entries.insert(hash, fingerprint.clone()) {
            if previous.size_bytes != size_bytes {
                warn!(
                    hash = %hash.short(),
                    previous = ?previous.destination_path,
                    current = ?fingerprint.destination_path,
                    "Hash collision with different size, index entry superseded"
                );
            }
        }
        fingerprint
    }

    /// 清空索引，下次使用时重新遍历备份目录
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.state = IndexState::Empty;
    }

    /// 索引统计（会先构建索引）
    pub fn stats(&self) -> IndexStats {
        let mut inner = self.lock();
        self.build_locked(&mut inner);
        IndexStats {
            file_count: inner.entries.len(),
            total_size_bytes: inner.entries.values().map(|fp| fp.size_bytes).sum(),
        }
    }

    /// 按路径排序的全部指纹（会先构建索引）
    pub fn fingerprints(&self) -> Vec<FileFingerprint> {
        let mut inner = self.lock();
        self.build_locked(&mut inner);
        let mut all: Vec<FileFingerprint> = inner.entries.values().cloned().collect();
        all.sort_by(|a, b| a.destination_path.cmp(&b.destination_path));
        all
    }

    fn lock(&self) -> MutexGuard<'_, IndexInner> {
        // 构建过程中 panic 不会留下半个状态：状态只在插入完成后才切换
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn build_locked(&self, inner: &mut IndexInner) -> IndexBuildReport {
        if inner.state == IndexState::Built {
            return IndexBuildReport::default();
        }

        let mut report = IndexBuildReport {
            walked: true,
            ..Default::default()
        };

        if !self.destination.exists() {
            debug!(destination = ?self.destination, "Backup directory missing, index is empty");
            inner.state = IndexState::Built;
            return report;
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.destination).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    warn!("Could not access {:?} while indexing: {}", err.path(), err);
                    report.unreadable += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let is_media = entry
                .file_name()
                .to_str()
                .and_then(lowercase_extension)
                .is_some_and(|ext| self.media_extensions.contains(&ext));
            if is_media {
                files.push(entry.into_path());
            }
        }

        // 本地磁盘上的哈希计算可以并行，不涉及设备访问
        let hashed: Vec<(PathBuf, std::io::Result<(ContentHash, u64)>)> = files
            .into_par_iter()
            .map(|path| {
                let result = (self.file_hasher)(&path);
                (path, result)
            })
            .collect();

        for (path, result) in hashed {
            match result {
                Ok((hash, size)) => {
                    if let Some(previous) = inner.entries.get(&hash) {
                        if previous.size_bytes != size {
                            warn!(
                                hash = %hash.short(),
                                previous = ?previous.destination_path,
                                current = ?path,
                                "Hash collision with different size, index entry superseded"
                            );
                            report.collisions += 1;
                        } else {
                            debug!(
                                "Archived duplicate: {:?} has the same content as {:?}",
                                path, previous.destination_path
                            );
                        }
                    }
                    inner.entries.insert(hash, FileFingerprint::new(path, hash, size));
                    report.indexed += 1;
                }
                Err(e) => {
                    warn!("Could not fingerprint {:?}: {}", path, e);
                    report.unreadable += 1;
                }
            }
        }

        inner.state = IndexState::Built;
        debug!(
            files = inner.entries.len(),
            unreadable = report.unreadable,
            "Built fingerprint cache for {:?}",
            self.destination
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn extensions() -> BTreeSet<String> {
        ["jpg", "heic", "mov"].iter().map(|s| s.to_string()).collect()
    }

    fn write(root: &Path, rel: &str, data: &[u8]) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_build_counts_only_media_files() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "2023/2023-12-25/IMG_001.jpg", b"one");
        write(tmp.path(), "2023/2023-12-25/IMG_002.HEIC", b"two");
        write(tmp.path(), "2024/2024-06-15/clip.mov", b"three");
        write(tmp.path(), "2024/2024-06-15/notes.txt", b"four");
        write(tmp.path(), "2024/2024-06-15/.camvault-abc.partial", b"five");

        let index = FingerprintIndex::new(tmp.path(), extensions());
        let report = index.ensure_built();

        assert!(report.walked);
        assert_eq!(report.indexed, 3);
        assert_eq!(index.stats().file_count, 3);
        assert_eq!(index.stats().total_size_bytes, 3 + 3 + 5);
    }

    #[test]
    fn test_build_happens_once_until_reset() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "2023/2023-01-01/a.jpg", b"a");

        let index = FingerprintIndex::new(tmp.path(), extensions());
        assert!(!index.is_built());
        assert!(index.ensure_built().walked);
        assert!(!index.ensure_built().walked);

        // 构建后写入的文件在 reset 之前不可见
        write(tmp.path(), "2023/2023-01-02/b.jpg", b"b");
        assert!(!index.check_duplicate(b"b").is_duplicate());

        index.reset();
        assert!(!index.is_built());
        assert!(index.check_duplicate(b"b").is_duplicate());
    }

    #[test]
    fn test_check_duplicate_builds_lazily() {
        let tmp = TempDir::new().unwrap();
        let existing = write(tmp.path(), "2023/2023-12-25/IMG_001.jpg", b"fake_image_data");

        let index = FingerprintIndex::new(tmp.path(), extensions());
        let check = index.check_duplicate(b"fake_image_data");

        assert!(index.is_built());
        assert!(check.is_duplicate());
        let fp = check.existing.unwrap();
        assert_eq!(fp.destination_path, existing);
        assert_eq!(fp.size_bytes, 15);
        assert!(fp.modified_at.is_some());

        assert!(!index.check_duplicate(b"other").is_duplicate());
    }

    #[test]
    fn test_record_makes_content_visible() {
        let tmp = TempDir::new().unwrap();
        let index = FingerprintIndex::new(tmp.path(), extensions());
        index.ensure_built();

        let path = write(tmp.path(), "2023/2023-12-25/new.jpg", b"new bytes");
        let fp = index.record(&path, b"new bytes");
        assert_eq!(fp.content_hash, hash_bytes(b"new bytes"));

        let check = index.check_duplicate(b"new bytes");
        assert_eq!(check.existing.unwrap().destination_path, path);
        assert_eq!(index.fingerprints().len(), 1);
    }

    #[test]
    fn test_missing_destination_builds_empty() {
        let tmp = TempDir::new().unwrap();
        let index = FingerprintIndex::new(tmp.path().join("nope"), extensions());
        let report = index.ensure_built();
        assert!(report.walked);
        assert_eq!(report.indexed, 0);
        assert_eq!(index.stats(), IndexStats::default());
        assert!(index.is_built());
    }

    #[test]
    fn test_concurrent_ensure_built_walks_once() {
        let tmp = TempDir::new().unwrap();
        for i in 0..20 {
            write(tmp.path(), &format!("2023/2023-01-01/{i}.jpg"), format!("{i}").as_bytes());
        }
        let index = FingerprintIndex::new(tmp.path(), extensions());

        let walks: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4).map(|_| s.spawn(|| index.ensure_built())).collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|r| r.walked)
                .count()
        });

        assert_eq!(walks, 1);
        assert_eq!(index.stats().file_count, 20);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_archived_file_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "2023/2023-12-25/IMG_001.jpg", b"one");
        let locked = write(tmp.path(), "2023/2023-12-25/IMG_002.jpg", b"two");
        write(tmp.path(), "2024/2024-06-15/clip.mov", b"three");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::File::open(&locked).is_ok() {
            // root 不受权限位限制
            return;
        }

        let index = FingerprintIndex::new(tmp.path(), extensions());
        let report = index.ensure_built();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();

        assert_eq!(report.unreadable, 1);
        assert_eq!(report.indexed, 2);
        assert!(index.is_built());
        assert!(index.check_duplicate(b"one").is_duplicate());
        assert!(index.check_duplicate(b"three").is_duplicate());
        assert!(!index.check_duplicate(b"two").is_duplicate());
    }

    #[test]
    fn test_same_hash_with_different_size_is_counted() {
        fn constant_hash(path: &Path) -> std::io::Result<(ContentHash, u64)> {
            Ok((hash_bytes(b"constant"), fs::metadata(path)?.len()))
        }

        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "2023/2023-12-25/a.jpg", b"1");
        write(tmp.path(), "2023/2023-12-25/b.jpg", b"22");

        let index = FingerprintIndex::new(tmp.path(), extensions()).with_file_hasher(constant_hash);
        let report = index.ensure_built();
        assert_eq!(report.indexed, 2);
        assert_eq!(report.collisions, 1);
        assert_eq!(index.stats().file_count, 1);
    }

    #[test]
    fn test_identical_archived_copies_are_not_collisions() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "2023/2023-12-25/a.jpg", b"same");
        write(tmp.path(), "2023/2023-12-26/a.jpg", b"same");

        let index = FingerprintIndex::new(tmp.path(), extensions());
        let report = index.ensure_built();
        assert_eq!(report.indexed, 2);
        assert_eq!(report.collisions, 0);
        assert_eq!(index.stats().file_count, 1);
    }
}
