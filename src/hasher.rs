// CamVault - 文件哈希计算模块
// 使用 SHA-256 计算文件内容的哈希值，作为去重的唯一依据

use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// 文件内容的 SHA-256 摘要
///
/// 相同字节序列的文件总是得到相同的摘要，与文件名、路径和时间戳无关。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// 完整的十六进制表示（64 个字符）
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// 用于显示的前 16 个十六进制字符
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// 计算内存中字节序列的哈希值
pub fn hash_bytes(data: &[u8]) -> ContentHash {
    ContentHash(Sha256::digest(data).into())
}

/// 流式计算本地文件内容的哈希值
///
/// 构建指纹索引时使用，避免把整个文件读入内存。
///
/// # 参数
/// * `path` - 要计算哈希的文件路径
///
/// # 返回
/// * `Ok((ContentHash, u64))` - 哈希值和文件字节数
/// * `Err(std::io::Error)` - 如果读取文件失败
///
/// # 实现细节
/// - 使用 1MB 的缓冲区读取文件
/// - 使用 64KB 的缓冲区进行哈希计算
pub fn hash_file(path: &Path) -> std::io::Result<(ContentHash, u64)> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(1024 * 1024, file);

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    let mut total = 0u64;

    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
        total += count as u64;
    }

    Ok((ContentHash(hasher.finalize().into()), total))
}
