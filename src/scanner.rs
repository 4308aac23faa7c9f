// CamVault - 源文件扫描模块
// 遍历设备上的相册目录，按扩展名和排除策略筛选出候选文件

use crate::actions::CandidateFile;
use crate::config::BackupConfig;
use crate::device::Device;
use crate::exclusion::ExclusionPolicy;
use crate::progress::{ProgressEvent, ProgressObserver};
use crate::utils::join_remote;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// 缩略图、缓存等非素材目录的路径片段
///
/// 目录路径（补上结尾的 `/`）包含其中任意一个时，跳过该目录下的文件。
pub const SKIP_DIR_MARKERS: [&str; 5] = [
    "/Thumbnails/",
    "/Cache/",
    "/Metadata/",
    "/.thumbnails/",
    "/.cache/",
];

/// 判断目录是否属于缩略图 / 缓存目录
pub fn is_skipped_directory(directory: &str) -> bool {
    let with_slash = if directory.ends_with('/') {
        directory.to_string()
    } else {
        format!("{}/", directory)
    };
    SKIP_DIR_MARKERS.iter().any(|m| with_slash.contains(m))
}

/// 源文件扫描器
pub struct SourceScanner {
    roots: Vec<String>,
    media_extensions: BTreeSet<String>,
    exclusion: ExclusionPolicy,
}

impl SourceScanner {
    pub fn new(config: &BackupConfig) -> Self {
        Self {
            roots: config.source_roots.clone(),
            media_extensions: config.media_extensions.clone(),
            exclusion: config.exclusion.clone(),
        }
    }

    /// 扫描设备，返回按遍历顺序排列的候选文件
    ///
    /// 单个根目录出错只会跳过该根目录（已经找到的文件保留），
    /// 所有根目录都不可访问时返回空列表而不是错误。
    ///
    /// # 参数
    /// * `device` - 已连接的设备
    /// * `observer` - 进度观察者
    pub fn scan<D: Device + ?Sized>(
        &self,
        device: &D,
        observer: &dyn ProgressObserver,
    ) -> Vec<CandidateFile> {
        let mut candidates = Vec::new();

        for root in &self.roots {
            if !device.exists(root) {
                debug!("Source root {} not present on device", root);
                observer.on_progress(&ProgressEvent::RootUnavailable {
                    root: root.clone(),
                    reason: "not found".to_string(),
                });
                continue;
            }

            debug!("Scanning {}", root);
            observer.on_progress(&ProgressEvent::ScanStarted { root: root.clone() });
            let before = candidates.len();

            for entry in device.walk(root) {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        warn!("Could not access {}: {}", root, e);
                        observer.on_progress(&ProgressEvent::RootUnavailable {
                            root: root.clone(),
                            reason: e.to_string(),
                        });
                        break;
                    }
                };

                // 跳过缩略图和缓存目录
                if is_skipped_directory(&entry.directory) {
                    debug!("Skipping directory {}", entry.directory);
                    continue;
                }

                for name in &entry.files {
                    let path = join_remote(&entry.directory, name);
                    let Some(candidate) = CandidateFile::from_path(path) else {
                        continue;
                    };
                    if !self.media_extensions.contains(&candidate.extension) {
                        continue;
                    }
                    if self.exclusion.should_exclude(&candidate.source_path) {
                        debug!("Excluding {} (configured exclusion)", candidate.source_path);
                        observer.on_progress(&ProgressEvent::Excluded {
                            path: candidate.source_path,
                        });
                        continue;
                    }
                    candidates.push(candidate);
                }
            }

            debug!("{} candidates under {}", candidates.len() - before, root);
        }

        debug!("Found {} photos/videos", candidates.len());
        observer.on_progress(&ProgressEvent::ScanCompleted {
            candidates: candidates.len(),
        });
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceInfo, DeviceWalk, MemoryDevice, RemoteStat, WalkEntry};
    use crate::error::DeviceError;
    use crate::progress::NoopObserver;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    fn paths(candidates: &[CandidateFile]) -> Vec<&str> {
        candidates.iter().map(|c| c.source_path.as_str()).collect()
    }

    fn connected(device: MemoryDevice) -> MemoryDevice {
        let mut device = device;
        device.connect().unwrap();
        device
    }

    #[test]
    fn test_skip_markers() {
        assert!(is_skipped_directory("/DCIM/Thumbnails"));
        assert!(is_skipped_directory("/DCIM/Thumbnails/V2"));
        assert!(is_skipped_directory("/PhotoData/Metadata/DCIM"));
        assert!(!is_skipped_directory("/DCIM/100APPLE"));
        assert!(!is_skipped_directory("/DCIM/CachedPhotos"));
    }

    #[test]
    fn test_scan_filters_extensions_markers_and_exclusions() {
        let device = connected(
            MemoryDevice::new()
                .with_file("/DCIM/100APPLE/IMG_0001.JPG", b"a".to_vec(), 1)
                .with_file("/DCIM/100APPLE/IMG_0002.HEIC", b"b".to_vec(), 1)
                .with_file("/DCIM/100APPLE/IMG_0003.AAE", b"c".to_vec(), 1)
                .with_file("/DCIM/100APPLE/upload.tmp", b"d".to_vec(), 1)
                .with_file("/DCIM/101APPLE/IMG_0100.MOV", b"e".to_vec(), 1)
                .with_file("/DCIM/Thumbnails/IMG_0001.JPG", b"f".to_vec(), 1)
                .with_file("/DCIM/.cache/IMG_0001.JPG", b"g".to_vec(), 1)
                .with_file("/Downloads/other.jpg", b"h".to_vec(), 1),
        );
        let mut config = BackupConfig::with_defaults("/backup");
        config.exclusion = ExclusionPolicy::new(
            ["/DCIM/100APPLE/IMG_0002.HEIC"],
            ["*/Thumbnails/*", "*.tmp"],
        )
        .unwrap();

        let excluded = RefCell::new(Vec::new());
        let observer = |event: &ProgressEvent| {
            if let ProgressEvent::Excluded { path } = event {
                excluded.borrow_mut().push(path.clone());
            }
        };
        let candidates = SourceScanner::new(&config).scan(&device, &observer);

        assert_eq!(
            paths(&candidates),
            vec!["/DCIM/100APPLE/IMG_0001.JPG", "/DCIM/101APPLE/IMG_0100.MOV"]
        );
        assert_eq!(candidates[1].extension, "mov");
        // 缩略图目录在排除策略之前就被跳过，.tmp 不是媒体扩展名
        assert_eq!(*excluded.borrow(), vec!["/DCIM/100APPLE/IMG_0002.HEIC"]);
    }

    #[test]
    fn test_glob_excluded_path_never_returned() {
        let device = connected(
            MemoryDevice::new()
                .with_file("/DCIM/Hidden/Album/IMG_1.JPG", b"a".to_vec(), 1)
                .with_file("/DCIM/100APPLE/IMG_2.JPG", b"b".to_vec(), 1),
        );
        let mut config = BackupConfig::with_defaults("/backup");
        config.exclusion = ExclusionPolicy::new(Vec::<String>::new(), ["*/Hidden/*"]).unwrap();

        let candidates = SourceScanner::new(&config).scan(&device, &NoopObserver);
        assert_eq!(paths(&candidates), vec!["/DCIM/100APPLE/IMG_2.JPG"]);
    }

    #[test]
    fn test_no_roots_is_empty_not_error() {
        let device = connected(MemoryDevice::new().with_file("/Other/a.jpg", b"a".to_vec(), 1));
        let config = BackupConfig::with_defaults("/backup");

        let unavailable = RefCell::new(0);
        let observer = |event: &ProgressEvent| {
            if matches!(event, ProgressEvent::RootUnavailable { .. }) {
                *unavailable.borrow_mut() += 1;
            }
        };
        let candidates = SourceScanner::new(&config).scan(&device, &observer);
        assert!(candidates.is_empty());
        assert_eq!(*unavailable.borrow(), 1);
    }

    /// 第一个根目录在遍历中途出错的设备
    struct FlakyDevice {
        inner: MemoryDevice,
    }

    impl Device for FlakyDevice {
        fn connect(&mut self) -> Result<DeviceInfo, DeviceError> {
            self.inner.connect()
        }

        fn exists(&self, path: &str) -> bool {
            self.inner.exists(path)
        }

        fn walk(&self, path: &str) -> DeviceWalk<'_> {
            if path == "/DCIM" {
                let first = WalkEntry {
                    directory: "/DCIM/100APPLE".to_string(),
                    subdirs: vec![],
                    files: vec!["IMG_0001.JPG".to_string()],
                };
                Box::new(
                    vec![
                        Ok(first),
                        Err(DeviceError::transport(
                            "/DCIM/101APPLE",
                            std::io::Error::other("usb hiccup"),
                        )),
                    ]
                    .into_iter(),
                )
            } else {
                self.inner.walk(path)
            }
        }

        fn read_file(&self, path: &str) -> Result<Vec<u8>, DeviceError> {
            self.inner.read_file(path)
        }

        fn stat(&self, path: &str) -> Result<RemoteStat, DeviceError> {
            self.inner.stat(path)
        }
    }

    #[test]
    fn test_root_error_keeps_partial_results_and_continues() {
        let mut device = FlakyDevice {
            inner: MemoryDevice::new()
                .with_file("/DCIM/100APPLE/IMG_0001.JPG", b"a".to_vec(), 1)
                .with_file("/PhotoStream/IMG_0500.JPG", b"b".to_vec(), 1),
        };
        device.connect().unwrap();

        let mut config = BackupConfig::with_defaults("/backup");
        config.source_roots = vec!["/DCIM".to_string(), "/PhotoStream".to_string()];

        let candidates = SourceScanner::new(&config).scan(&device, &NoopObserver);
        assert_eq!(
            paths(&candidates),
            vec!["/DCIM/100APPLE/IMG_0001.JPG", "/PhotoStream/IMG_0500.JPG"]
        );
    }
}
