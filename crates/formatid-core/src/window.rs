//! 有界前缀/后缀窗口读取
//!
//! - 可定位目标（文件、内存）：直接读取头部与尾部两段。
//! - 流式目标（stdin、tar/gzip 条目）：先读前缀，再分块推进并保留尾部重叠区（carry），
//!   内存占用始终不超过前缀 + 后缀 + 一个分块。
use std::io::{self, Read, Seek, SeekFrom};

use crate::cancel::Deadline;
use crate::error::{IdentifyError, Result};

/// 单次读取的分块大小；每块之间检查取消与超时
pub(crate) const READ_CHUNK: usize = 64 * 1024;

/// 目标的缓冲窗口（绝对偏移均从 0 开始）
#[derive(Debug, Clone)]
pub struct Windows {
    /// 覆盖 [0, prefix.len())
    prefix: Vec<u8>,
    /// 覆盖 [len - suffix.len(), len)；None 表示未请求或整份已在 prefix 中
    suffix: Option<Vec<u8>>,
    /// 目标总长度；未读到结尾时为已知下界
    len: u64,
    /// 是否已确认到达结尾（决定 EOF 锚点能否评估）
    complete: bool,
}

impl Windows {
    /// 从完整内存数据构造窗口
    pub fn from_bytes(data: &[u8], prefix_size: usize, suffix_size: usize) -> Self {
        let p = prefix_size.min(data.len());
        let suffix = if p == data.len() || suffix_size == 0 {
            None
        } else {
            Some(data[data.len() - suffix_size.min(data.len())..].to_vec())
        };
        Self { prefix: data[..p].to_vec(), suffix, len: data.len() as u64, complete: true }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.complete
    }

    pub(crate) fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// 后缀窗口；若整份数据都在前缀中，则返回前缀本身
    pub(crate) fn suffix(&self) -> &[u8] {
        match &self.suffix {
            Some(s) => s,
            None if self.whole_in_prefix() => &self.prefix,
            None => &[],
        }
    }

    pub(crate) fn suffix_origin(&self) -> u64 {
        self.len - self.suffix().len() as u64
    }

    pub(crate) fn whole_in_prefix(&self) -> bool {
        self.complete && self.prefix.len() as u64 == self.len
    }
}

/// 读取可定位目标的前缀与（可选）后缀窗口
pub(crate) fn read_seekable<R: Read + Seek>(
    reader: &mut R,
    name: &str,
    prefix_size: usize,
    suffix_size: usize,
    deadline: &Deadline,
) -> Result<Windows> {
    let io_err = |e: io::Error| IdentifyError::unreadable(name, e);
    let len = reader.seek(SeekFrom::End(0)).map_err(io_err)?;
    reader.seek(SeekFrom::Start(0)).map_err(io_err)?;

    let want = (prefix_size as u64).min(len) as usize;
    let prefix = read_up_to(reader, want, deadline).map_err(|e| lift(name, e))?;
    if (prefix.len() as u64) < len.min(prefix_size as u64) {
        // 读取过程中目标被截断：以实际读到的长度为准
        let len = prefix.len() as u64;
        return Ok(Windows { prefix, suffix: None, len, complete: true });
    }

    let suffix = if suffix_size > 0 && len > prefix.len() as u64 {
        let take = (suffix_size as u64).min(len);
        reader.seek(SeekFrom::Start(len - take)).map_err(io_err)?;
        let tail = read_up_to(reader, take as usize, deadline).map_err(|e| lift(name, e))?;
        Some(tail)
    } else {
        None
    };

    Ok(Windows { prefix, suffix, len, complete: true })
}

/// 读取流式目标：前缀 + 滚动尾部（需要后缀时才推进到结尾）
pub(crate) fn read_stream<R: Read>(
    reader: &mut R,
    name: &str,
    prefix_size: usize,
    suffix_size: usize,
    deadline: &Deadline,
) -> Result<Windows> {
    let prefix = read_up_to(reader, prefix_size, deadline).map_err(|e| lift(name, e))?;
    if prefix.len() < prefix_size {
        let len = prefix.len() as u64;
        return Ok(Windows { prefix, suffix: None, len, complete: true });
    }
    if suffix_size == 0 {
        // 不需要尾部：长度未知，仅记录下界
        let len = prefix.len() as u64;
        return Ok(Windows { prefix, suffix: None, len, complete: false });
    }

    let mut buf = vec![0u8; READ_CHUNK];
    let mut carry: Vec<u8> = Vec::new();
    let mut total = prefix.len() as u64;
    loop {
        deadline.check()?;
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(IdentifyError::unreadable(name, e)),
        };
        carry.extend_from_slice(&buf[..n]);
        if carry.len() > suffix_size {
            let drop = carry.len() - suffix_size;
            carry.drain(..drop);
        }
        total += n as u64;
    }

    if total == prefix.len() as u64 {
        return Ok(Windows { prefix, suffix: None, len: total, complete: true });
    }
    // 剩余部分不足后缀大小时，用前缀尾部补齐，保证跨边界的尾部序列仍可匹配
    let suffix = if carry.len() < suffix_size {
        let need = (suffix_size - carry.len()).min(prefix.len());
        let mut s = Vec::with_capacity(need + carry.len());
        s.extend_from_slice(&prefix[prefix.len() - need..]);
        s.extend_from_slice(&carry);
        s
    } else {
        carry
    };
    Ok(Windows { prefix, suffix: Some(suffix), len: total, complete: true })
}

/// 读取至多 `limit` 字节到内存（容器条目缓冲使用）
pub(crate) fn read_bounded<R: Read>(reader: &mut R, name: &str, limit: usize, deadline: &Deadline) -> Result<Vec<u8>> {
    read_up_to(reader, limit, deadline).map_err(|e| lift(name, e))
}

enum ReadFailure {
    Io(io::Error),
    Stopped(IdentifyError),
}

fn lift(name: &str, failure: ReadFailure) -> IdentifyError {
    match failure {
        ReadFailure::Io(e) => IdentifyError::unreadable(name, e),
        ReadFailure::Stopped(e) => e,
    }
}

/// 读取至多 `limit` 字节，遇到 EOF 提前返回；分块之间检查截止条件
fn read_up_to<R: Read>(reader: &mut R, limit: usize, deadline: &Deadline) -> std::result::Result<Vec<u8>, ReadFailure> {
    let mut out = Vec::with_capacity(limit.min(READ_CHUNK));
    while out.len() < limit {
        deadline.check().map_err(ReadFailure::Stopped)?;
        let step = (limit - out.len()).min(READ_CHUNK);
        let n = reader
            .by_ref()
            .take(step as u64)
            .read_to_end(&mut out)
            .map_err(ReadFailure::Io)?;
        if n == 0 {
            break;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn data(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn seekable_small_target_lives_in_prefix() {
        let bytes = data(100);
        let w = read_seekable(&mut Cursor::new(&bytes), "t", 4096, 4096, &Deadline::unbounded()).unwrap();
        assert_eq!(w.len(), 100);
        assert!(w.whole_in_prefix());
        assert_eq!(w.suffix(), &bytes[..]);
        assert_eq!(w.suffix_origin(), 0);
    }

    #[test]
    fn seekable_large_target_reads_both_ends() {
        let bytes = data(10_000);
        let w = read_seekable(&mut Cursor::new(&bytes), "t", 1000, 500, &Deadline::unbounded()).unwrap();
        assert_eq!(w.prefix(), &bytes[..1000]);
        assert_eq!(w.suffix(), &bytes[9_500..]);
        assert_eq!(w.suffix_origin(), 9_500);
    }

    #[test]
    fn stream_matches_seekable_windows() {
        let bytes = data(300_000);
        let d = Deadline::unbounded();
        let a = read_seekable(&mut Cursor::new(&bytes), "t", 1024, 2048, &d).unwrap();
        let b = read_stream(&mut &bytes[..], "t", 1024, 2048, &d).unwrap();
        assert_eq!(a.prefix(), b.prefix());
        assert_eq!(a.suffix(), b.suffix());
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn stream_short_tail_is_padded_from_prefix() {
        let bytes = data(1100);
        let w = read_stream(&mut &bytes[..], "t", 1000, 500, &Deadline::unbounded()).unwrap();
        assert_eq!(w.suffix(), &bytes[600..]);
        assert_eq!(w.suffix_origin(), 600);
    }

    #[test]
    fn stream_without_suffix_is_incomplete() {
        let bytes = data(5000);
        let w = read_stream(&mut &bytes[..], "t", 1000, 0, &Deadline::unbounded()).unwrap();
        assert!(!w.is_complete());
        assert_eq!(w.prefix().len(), 1000);
    }
}
