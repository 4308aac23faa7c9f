// CamVault - 设备访问模块
// 定义只读设备文件系统的访问接口，以及挂载点设备和内存设备两种实现

use crate::error::DeviceError;
use crate::utils::join_remote;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// 设备上文件的元数据
///
/// 时间戳为 Unix 秒；`None` 或不大于 0 的值都视为无效。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteStat {
    pub size_bytes: u64,
    pub modified_at: Option<i64>,
    pub changed_at: Option<i64>,
}

/// 遍历中的一个目录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// 目录的设备路径
    pub directory: String,
    /// 子目录名
    pub subdirs: Vec<String>,
    /// 文件名
    pub files: Vec<String>,
}

/// 设备信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub location: String,
    pub camera_roll_present: bool,
    pub top_level_entries: usize,
}

/// 一个按目录逐步产出的遍历序列
pub type DeviceWalk<'a> = Box<dyn Iterator<Item = Result<WalkEntry, DeviceError>> + 'a>;

/// 只读设备文件系统
///
/// 所有调用都是阻塞的，并且调用方保证一次只发起一个请求。
pub trait Device {
    /// 建立连接并返回设备信息
    fn connect(&mut self) -> Result<DeviceInfo, DeviceError>;

    fn exists(&self, path: &str) -> bool;

    /// 从 `path` 开始遍历目录树
    ///
    /// 每次迭代只列出一个目录，调用方不应假设整棵树已在内存中。
    fn walk(&self, path: &str) -> DeviceWalk<'_>;

    /// 读取整个文件
    fn read_file(&self, path: &str) -> Result<Vec<u8>, DeviceError>;

    fn stat(&self, path: &str) -> Result<RemoteStat, DeviceError>;
}

/// 通过本地挂载点访问的设备（如 ifuse、gvfs-mtp 的挂载目录）
#[derive(Debug, Clone)]
pub struct MountedDevice {
    name: String,
    mount_point: PathBuf,
    connected: bool,
}

impl MountedDevice {
    pub fn new(name: impl Into<String>, mount_point: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            mount_point: mount_point.into(),
            connected: false,
        }
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 设备路径 `/DCIM/100APPLE` 映射为 `<mount_point>/DCIM/100APPLE`
    pub fn local_path(&self, remote: &str) -> PathBuf {
        let rel = remote.trim_start_matches('/');
        if rel.is_empty() {
            self.mount_point.clone()
        } else {
            self.mount_point.join(rel)
        }
    }

    fn ensure_connected(&self) -> Result<(), DeviceError> {
        if self.connected {
            Ok(())
        } else {
            Err(DeviceError::NotConnected)
        }
    }
}

impl Device for MountedDevice {
    fn connect(&mut self) -> Result<DeviceInfo, DeviceError> {
        let location = self.mount_point.display().to_string();
        let meta = fs::metadata(&self.mount_point).map_err(|e| DeviceError::Connection {
            location: location.clone(),
            reason: e.to_string(),
        })?;
        if !meta.is_dir() {
            return Err(DeviceError::Connection {
                location,
                reason: "mount point is not a directory".to_string(),
            });
        }

        let top_level_entries = fs::read_dir(&self.mount_point)
            .map_err(|e| DeviceError::Connection {
                location: location.clone(),
                reason: e.to_string(),
            })?
            .count();

        self.connected = true;
        let info = DeviceInfo {
            name: self.name.clone(),
            location,
            camera_roll_present: self.mount_point.join("DCIM").is_dir(),
            top_level_entries,
        };
        debug!(device = %info.name, "Connected to device at {}", info.location);
        Ok(info)
    }

    fn exists(&self, path: &str) -> bool {
        self.connected && self.local_path(path).exists()
    }

    fn walk(&self, path: &str) -> DeviceWalk<'_> {
        if let Err(e) = self.ensure_connected() {
            return Box::new(std::iter::once(Err(e)));
        }
        Box::new(MountedWalk {
            device: self,
            pending: vec![path.to_string()],
        })
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, DeviceError> {
        self.ensure_connected()?;
        fs::read(self.local_path(path)).map_err(|e| DeviceError::transport(path, e))
    }

    fn stat(&self, path: &str) -> Result<RemoteStat, DeviceError> {
        self.ensure_connected()?;
        let meta = fs::metadata(self.local_path(path)).map_err(|e| DeviceError::transport(path, e))?;

        let to_secs = |t: std::io::Result<std::time::SystemTime>| {
            t.ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
        };

        #[cfg(unix)]
        let changed_at = {
            use std::os::unix::fs::MetadataExt;
            Some(meta.ctime())
        };
        #[cfg(not(unix))]
        let changed_at = to_secs(meta.created());

        Ok(RemoteStat {
            size_bytes: meta.len(),
            modified_at: to_secs(meta.modified()),
            changed_at,
        })
    }
}

/// 挂载点设备的惰性遍历：每次 `next` 只读取一个目录
struct MountedWalk<'a> {
    device: &'a MountedDevice,
    pending: Vec<String>,
}

impl Iterator for MountedWalk<'_> {
    type Item = Result<WalkEntry, DeviceError>;

    fn next(&mut self) -> Option<Self::Item> {
        let directory = self.pending.pop()?;
        let local = self.device.local_path(&directory);

        let mut subdirs = Vec::new();
        let mut files = Vec::new();
        let listing = WalkDir::new(&local)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name();
        for entry in listing {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    let source = err
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
                    return Some(Err(DeviceError::transport(directory, source)));
                }
            };
            // 设备路径是字符串，无法还原的文件名即使列出也读不到
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(
                    "Skipping {:?} in {}: name is not valid UTF-8",
                    entry.file_name().to_string_lossy(),
                    directory
                );
                continue;
            };
            if entry.file_type().is_dir() {
                subdirs.push(name);
            } else if entry.file_type().is_file() {
                files.push(name);
            }
        }

        // 逆序压栈，保证按名称顺序深度优先
        for sub in subdirs.iter().rev() {
            self.pending.push(join_remote(&directory, sub));
        }

        debug!(dir = %directory, files = files.len(), "Listed device directory");
        Some(Ok(WalkEntry {
            directory,
            subdirs,
            files,
        }))
    }
}

/// 在常见挂载目录下查找包含 `DCIM` 的设备
///
/// 检查每个搜索路径下两层以内的目录。
pub fn discover_devices(search_paths: &[PathBuf]) -> Vec<MountedDevice> {
    let mut found = Vec::new();
    for base in search_paths {
        if !base.is_dir() {
            continue;
        }
        let candidates = WalkDir::new(base)
            .min_depth(1)
            .max_depth(2)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir());
        for entry in candidates {
            if entry.path().join("DCIM").is_dir() {
                let name = entry.file_name().to_string_lossy().into_owned();
                found.push(MountedDevice::new(name, entry.into_path()));
            }
        }
    }
    found
}

/// 默认的挂载搜索路径
pub fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(runtime) = std::env::var_os("XDG_RUNTIME_DIR") {
        paths.push(PathBuf::from(runtime).join("gvfs"));
    }
    paths.extend(["/media", "/mnt", "/Volumes"].iter().map(PathBuf::from));
    paths
}

#[derive(Debug, Clone)]
struct MemoryFile {
    data: Vec<u8>,
    stat: RemoteStat,
}

/// 内存中的设备
///
/// 用于测试和演练：可以注入连接失败和单个文件的读取失败。
#[derive(Debug, Clone, Default)]
pub struct MemoryDevice {
    files: BTreeMap<String, MemoryFile>,
    failing_reads: HashSet<String>,
    refuse_connection: bool,
    connected: bool,
}

impl MemoryDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加文件，修改时间和变更时间都设为 `modified_at`
    pub fn with_file(self, path: &str, data: impl Into<Vec<u8>>, modified_at: i64) -> Self {
        let stat = RemoteStat {
            size_bytes: 0,
            modified_at: Some(modified_at),
            changed_at: Some(modified_at),
        };
        self.with_file_stat(path, data, stat)
    }

    /// 添加文件并指定元数据（`size_bytes` 总是取自内容）
    pub fn with_file_stat(mut self, path: &str, data: impl Into<Vec<u8>>, stat: RemoteStat) -> Self {
        let data = data.into();
        let stat = RemoteStat {
            size_bytes: data.len() as u64,
            ..stat
        };
        self.files.insert(path.to_string(), MemoryFile { data, stat });
        self
    }

    /// 读取该路径时返回传输错误
    pub fn failing_read(mut self, path: &str) -> Self {
        self.failing_reads.insert(path.to_string());
        self
    }

    /// `connect` 总是失败
    pub fn refusing_connection(mut self) -> Self {
        self.refuse_connection = true;
        self
    }

    fn is_dir(&self, path: &str) -> bool {
        let prefix = dir_prefix(path);
        self.files.keys().any(|f| f.starts_with(&prefix))
    }

    fn file(&self, path: &str) -> Result<&MemoryFile, DeviceError> {
        if !self.connected {
            return Err(DeviceError::NotConnected);
        }
        self.files
            .get(path)
            .ok_or_else(|| DeviceError::NotFound(path.to_string()))
    }
}

fn dir_prefix(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

impl Device for MemoryDevice {
    fn connect(&mut self) -> Result<DeviceInfo, DeviceError> {
        if self.refuse_connection {
            return Err(DeviceError::Connection {
                location: "memory".to_string(),
                reason: "device is locked".to_string(),
            });
        }
        self.connected = true;
        let top_level: BTreeSet<&str> = self
            .files
            .keys()
            .filter_map(|f| f.trim_start_matches('/').split('/').next())
            .collect();
        Ok(DeviceInfo {
            name: "memory".to_string(),
            location: "memory".to_string(),
            camera_roll_present: self.is_dir("/DCIM"),
            top_level_entries: top_level.len(),
        })
    }

    fn exists(&self, path: &str) -> bool {
        self.connected && (self.files.contains_key(path) || self.is_dir(path))
    }

    fn walk(&self, path: &str) -> DeviceWalk<'_> {
        if !self.connected {
            return Box::new(std::iter::once(Err(DeviceError::NotConnected)));
        }

        // 按目录分组，目录路径不含结尾的 `/`
        let root = path.trim_end_matches('/').to_string();
        let prefix = dir_prefix(&root);
        let mut tree: BTreeMap<String, (BTreeSet<String>, Vec<String>)> = BTreeMap::new();
        for file in self.files.keys().filter(|f| f.starts_with(&prefix)) {
            let Some((dir, name)) = file.rsplit_once('/') else {
                continue;
            };
            tree.entry(dir.to_string()).or_default().1.push(name.to_string());

            // 登记从根到该目录的每一级
            let mut child = dir;
            while let Some((parent, sub)) = child.rsplit_once('/') {
                if child.len() <= root.len() {
                    break;
                }
                tree.entry(parent.to_string())
                    .or_default()
                    .0
                    .insert(sub.to_string());
                child = parent;
            }
        }

        Box::new(tree.into_iter().map(|(directory, (subdirs, files))| {
            Ok(WalkEntry {
                directory,
                subdirs: subdirs.into_iter().collect(),
                files,
            })
        }))
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, DeviceError> {
        let file = self.file(path)?;
        if self.failing_reads.contains(path) {
            return Err(DeviceError::transport(
                path,
                std::io::Error::new(std::io::ErrorKind::ConnectionReset, "device disconnected"),
            ));
        }
        Ok(file.data.clone())
    }

    fn stat(&self, path: &str) -> Result<RemoteStat, DeviceError> {
        Ok(self.file(path)?.stat)
    }
}
