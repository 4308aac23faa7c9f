// CamVault - 元数据提取模块
// 从图片内嵌的 EXIF 信息中读取拍摄时间

use chrono::{NaiveDate, NaiveDateTime};
use exif::{In, Reader, Tag, Value};
use std::io::Cursor;
use tracing::debug;

/// 从文件内容中提取拍摄时间
///
/// 对非图片或损坏的内容必须返回 `None`，不能 panic。
pub trait MetadataExtractor {
    fn extract_captured_at(&self, bytes: &[u8]) -> Option<NaiveDateTime>;
}

impl<F> MetadataExtractor for F
where
    F: Fn(&[u8]) -> Option<NaiveDateTime>,
{
    fn extract_captured_at(&self, bytes: &[u8]) -> Option<NaiveDateTime> {
        self(bytes)
    }
}

/// 读取 EXIF 时间标签
///
/// 依次尝试 `DateTimeOriginal`、`DateTimeDigitized`、`DateTime`。
/// 支持 JPEG、TIFF、HEIF、PNG、WebP 容器；视频文件没有 EXIF，返回 `None`。
#[derive(Debug, Clone, Copy, Default)]
pub struct ExifExtractor;

const DATE_TAGS: [Tag; 3] = [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime];

impl MetadataExtractor for ExifExtractor {
    fn extract_captured_at(&self, bytes: &[u8]) -> Option<NaiveDateTime> {
        let exif = match Reader::new().read_from_container(&mut Cursor::new(bytes)) {
            Ok(exif) => exif,
            Err(e) => {
                debug!("No EXIF data: {}", e);
                return None;
            }
        };

        DATE_TAGS.iter().find_map(|tag| {
            let field = exif.get_field(*tag, In::PRIMARY)?;
            match &field.value {
                Value::Ascii(values) => values.iter().find_map(|raw| parse_exif_datetime(raw)),
                _ => None,
            }
        })
    }
}

/// 不读取任何元数据，总是返回 `None`
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMetadata;

impl MetadataExtractor for NoMetadata {
    fn extract_captured_at(&self, _bytes: &[u8]) -> Option<NaiveDateTime> {
        None
    }
}

/// 解析 `YYYY:MM:DD HH:MM:SS` 格式的 EXIF 时间
fn parse_exif_datetime(raw: &[u8]) -> Option<NaiveDateTime> {
    let dt = exif::DateTime::from_ascii(raw).ok()?;
    NaiveDate::from_ymd_opt(dt.year.into(), dt.month.into(), dt.day.into())?.and_hms_opt(
        dt.hour.into(),
        dt.minute.into(),
        dt.second.into(),
    )
}
