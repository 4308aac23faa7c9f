// CamVault - 拍摄日期解析模块
// 按 "内嵌元数据 -> 设备修改时间 -> 设备变更时间 -> 当前时间" 的顺序确定文件的拍摄日期

use crate::device::{Device, RemoteStat};
use crate::metadata::MetadataExtractor;
use chrono::{Local, NaiveDateTime, TimeZone};
use tracing::{debug, warn};

/// 拍摄日期的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    Metadata,
    Modified,
    Changed,
    Now,
}

/// 解析得到的拍摄日期（本地时区的日历时间）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDate {
    pub taken: NaiveDateTime,
    pub source: DateSource,
}

impl ResolvedDate {
    /// 是否退回到了当前时间
    pub fn is_fallback(&self) -> bool {
        self.source == DateSource::Now
    }
}

/// 拍摄日期解析器
///
/// 每一步都是 `Option`，失败或数据无效时进入下一步，整个过程不会返回错误。
pub struct CaptureDateResolver {
    extractor: Box<dyn MetadataExtractor>,
}

impl CaptureDateResolver {
    pub fn new(extractor: impl MetadataExtractor + 'static) -> Self {
        Self {
            extractor: Box::new(extractor),
        }
    }

    /// 解析拍摄日期，需要时自行从设备读取文件内容
    ///
    /// 读取失败时跳过元数据这一步。
    pub fn resolve<D: Device + ?Sized>(&self, source_path: &str, device: &D) -> ResolvedDate {
        let bytes = match device.read_file(source_path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!("Could not read {} for metadata: {}", source_path, e);
                None
            }
        };
        self.resolve_chain(source_path, bytes.as_deref(), device)
    }

    /// 使用已读取的内容解析拍摄日期，不会再次读取文件
    pub fn resolve_with_bytes<D: Device + ?Sized>(
        &self,
        source_path: &str,
        bytes: &[u8],
        device: &D,
    ) -> ResolvedDate {
        self.resolve_chain(source_path, Some(bytes), device)
    }

    fn resolve_chain<D: Device + ?Sized>(
        &self,
        source_path: &str,
        bytes: Option<&[u8]>,
        device: &D,
    ) -> ResolvedDate {
        if let Some(taken) = bytes.and_then(|b| self.extractor.extract_captured_at(b)) {
            return ResolvedDate {
                taken,
                source: DateSource::Metadata,
            };
        }

        let stat = match device.stat(source_path) {
            Ok(stat) => Some(stat),
            Err(e) => {
                debug!("Could not stat {}: {}", source_path, e);
                None
            }
        };
        if let Some(resolved) = stat.as_ref().and_then(date_from_stat) {
            return resolved;
        }

        warn!("Could not determine date for {}, using current date", source_path);
        ResolvedDate {
            taken: Local::now().naive_local(),
            source: DateSource::Now,
        }
    }
}

/// 修改时间优先，其次变更时间；不大于 0 的时间戳无效
fn date_from_stat(stat: &RemoteStat) -> Option<ResolvedDate> {
    let modified = stat
        .modified_at
        .and_then(local_from_epoch)
        .map(|taken| ResolvedDate {
            taken,
            source: DateSource::Modified,
        });
    modified.or_else(|| {
        stat.changed_at.and_then(local_from_epoch).map(|taken| ResolvedDate {
            taken,
            source: DateSource::Changed,
        })
    })
}

fn local_from_epoch(secs: i64) -> Option<NaiveDateTime> {
    if secs <= 0 {
        return None;
    }
    Local
        .timestamp_opt(secs, 0)
        .single()
        .map(|dt| dt.naive_local())
}
