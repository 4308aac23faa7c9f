// CamVault - 设备文件列表模块
// 列出设备上某个目录下的文件，区分照片 / 视频和其他文件，并汇总统计

use crate::device::Device;
use crate::error::DeviceError;
use crate::utils::{join_remote, lowercase_extension, remote_file_name};
use chrono::{DateTime, Local};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// 列表选项
#[derive(Debug, Clone)]
pub struct ListOptions {
    /// 是否进入子目录
    pub recursive: bool,

    /// 只保留照片和视频
    pub media_only: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            media_only: false,
        }
    }
}

/// 设备上的一个文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedFile {
    pub path: String,

    /// 小写扩展名，没有扩展名时为空
    pub extension: String,

    pub size_bytes: u64,

    /// 修改时间，无效时退回变更时间；stat 失败时为 `None`
    pub modified_at: Option<DateTime<Local>>,

    pub is_media: bool,
}

/// 列表汇总
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListingStats {
    pub total_files: u64,
    pub total_dirs: u64,
    pub media_files: u64,
    pub other_files: u64,
    pub total_bytes: u64,

    /// stat 失败或遍历中断的次数
    pub errors: u64,
}

#[derive(Debug, Clone, Default)]
pub struct FileListing {
    /// 按路径排序
    pub files: Vec<ListedFile>,
    pub stats: ListingStats,
}

/// 列出设备目录下的文件
///
/// # 参数
/// * `device` - 已连接的设备
/// * `root` - 起始目录
/// * `media_extensions` - 照片 / 视频扩展名（小写，不含 `.`）
/// * `options` - 列表选项
///
/// # 返回
/// * `Ok(FileListing)` - 文件列表和统计；单个文件 stat 失败只计入 `errors`
/// * `Err(DeviceError::NotFound)` - 起始目录不存在
pub fn list_files<D: Device + ?Sized>(
    device: &D,
    root: &str,
    media_extensions: &BTreeSet<String>,
    options: &ListOptions,
) -> Result<FileListing, DeviceError> {
    if !device.exists(root) {
        return Err(DeviceError::NotFound(root.to_string()));
    }

    let mut listing = FileListing::default();
    for entry in device.walk(root) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Could not list {}: {}", root, e);
                listing.stats.errors += 1;
                break;
            }
        };
        listing.stats.total_dirs += entry.subdirs.len() as u64;

        for name in &entry.files {
            let path = join_remote(&entry.directory, name);
            let file = describe(device, path, media_extensions, &mut listing.stats);
            if options.media_only && !file.is_media {
                continue;
            }

            listing.stats.total_files += 1;
            listing.stats.total_bytes += file.size_bytes;
            if file.is_media {
                listing.stats.media_files += 1;
            } else {
                listing.stats.other_files += 1;
            }
            listing.files.push(file);
        }

        if !options.recursive {
            break;
        }
    }

    listing.files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(listing)
}

fn describe<D: Device + ?Sized>(
    device: &D,
    path: String,
    media_extensions: &BTreeSet<String>,
    stats: &mut ListingStats,
) -> ListedFile {
    let extension = lowercase_extension(remote_file_name(&path)).unwrap_or_default();
    let is_media = media_extensions.contains(&extension);

    let (size_bytes, modified_at) = match device.stat(&path) {
        Ok(stat) => {
            let modified_at = [stat.modified_at, stat.changed_at]
                .into_iter()
                .flatten()
                .filter(|secs| *secs > 0)
                .find_map(|secs| DateTime::from_timestamp(secs, 0))
                .map(|t| t.with_timezone(&Local));
            (stat.size_bytes, modified_at)
        }
        Err(e) => {
            debug!("Could not stat {}: {}", path, e);
            stats.errors += 1;
            (0, None)
        }
    };

    ListedFile {
        path,
        extension,
        size_bytes,
        modified_at,
        is_media,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceInfo, DeviceWalk, MemoryDevice, RemoteStat};
    use pretty_assertions::assert_eq;

    fn media() -> BTreeSet<String> {
        ["jpg", "heic", "mov"].iter().map(|s| s.to_string()).collect()
    }

    fn phone() -> MemoryDevice {
        let mut device = MemoryDevice::new()
            .with_file("/DCIM/100APPLE/IMG_0001.JPG", b"12345".to_vec(), 1_700_000_000)
            .with_file("/DCIM/100APPLE/IMG_0001.AAE", b"xml".to_vec(), 1_700_000_000)
            .with_file("/DCIM/101APPLE/IMG_0100.MOV", b"movie".to_vec(), 1_700_000_000)
            .with_file("/DCIM/README", b"r".to_vec(), 0);
        device.connect().unwrap();
        device
    }

    fn paths(listing: &FileListing) -> Vec<&str> {
        listing.files.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn test_recursive_listing_totals() {
        let listing = list_files(&phone(), "/DCIM", &media(), &ListOptions::default()).unwrap();

        assert_eq!(
            paths(&listing),
            vec![
                "/DCIM/100APPLE/IMG_0001.AAE",
                "/DCIM/100APPLE/IMG_0001.JPG",
                "/DCIM/101APPLE/IMG_0100.MOV",
                "/DCIM/README",
            ]
        );
        assert_eq!(
            listing.stats,
            ListingStats {
                total_files: 4,
                total_dirs: 2,
                media_files: 2,
                other_files: 2,
                total_bytes: 14,
                errors: 0,
            }
        );

        let readme = &listing.files[3];
        assert_eq!(readme.extension, "");
        assert_eq!(readme.modified_at, None);
        let jpg = &listing.files[1];
        assert!(jpg.is_media);
        assert_eq!(jpg.size_bytes, 5);
        assert_eq!(jpg.modified_at.map(|t| t.timestamp()), Some(1_700_000_000));
    }

    #[test]
    fn test_media_only_and_non_recursive() {
        let media_only = ListOptions {
            recursive: true,
            media_only: true,
        };
        let listing = list_files(&phone(), "/DCIM", &media(), &media_only).unwrap();
        assert_eq!(
            paths(&listing),
            vec!["/DCIM/100APPLE/IMG_0001.JPG", "/DCIM/101APPLE/IMG_0100.MOV"]
        );
        assert_eq!(listing.stats.other_files, 0);

        let top_only = ListOptions {
            recursive: false,
            media_only: false,
        };
        let listing = list_files(&phone(), "/DCIM", &media(), &top_only).unwrap();
        assert_eq!(paths(&listing), vec!["/DCIM/README"]);
        assert_eq!(listing.stats.total_dirs, 2);
    }

    #[test]
    fn test_missing_root_is_not_found() {
        let err = list_files(&phone(), "/Nope", &media(), &ListOptions::default()).unwrap_err();
        assert!(matches!(err, DeviceError::NotFound(path) if path == "/Nope"));
    }

    /// stat 总是失败的设备
    struct NoStat(MemoryDevice);

    impl Device for NoStat {
        fn connect(&mut self) -> Result<DeviceInfo, DeviceError> {
            self.0.connect()
        }

        fn exists(&self, path: &str) -> bool {
            self.0.exists(path)
        }

        fn walk(&self, path: &str) -> DeviceWalk<'_> {
            self.0.walk(path)
        }

        fn read_file(&self, path: &str) -> Result<Vec<u8>, DeviceError> {
            self.0.read_file(path)
        }

        fn stat(&self, path: &str) -> Result<RemoteStat, DeviceError> {
            Err(DeviceError::transport(path, std::io::Error::other("stat refused")))
        }
    }

    #[test]
    fn test_stat_failures_are_counted_not_fatal() {
        let device = NoStat(phone());
        let listing = list_files(&device, "/DCIM", &media(), &ListOptions::default()).unwrap();
        assert_eq!(listing.stats.total_files, 4);
        assert_eq!(listing.stats.errors, 4);
        assert_eq!(listing.stats.total_bytes, 0);
    }
}
