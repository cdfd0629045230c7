//! 容器检查：ZIP / TAR / GZIP 条目枚举
//!
//! 条目以内部迭代（visitor）方式逐个产出，不落盘：
//! - 不超过 `max_in_memory` 的条目整读进内存，可继续递归识别；
//! - 更大的条目按窗口流式读取，仅识别、不再递归。
//! 每次调用都会重新打开来源，因此枚举可重复执行。
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cancel::Deadline;
use crate::catalog::FormatSignature;
use crate::error::{IdentifyError, Result};
use crate::window::{self, Windows};

/// 支持展开的容器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Zip,
    Tar,
    Gzip,
}

pub fn is_container_format(format: &FormatSignature) -> bool {
    format.container.is_some()
}

pub(crate) trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// 可重复打开的目标来源
#[derive(Debug, Clone)]
pub(crate) enum Source {
    File(PathBuf),
    Memory(Arc<[u8]>),
}

impl Source {
    pub(crate) fn open(&self) -> io::Result<Box<dyn ReadSeek>> {
        Ok(match self {
            Source::File(p) => Box::new(BufReader::new(File::open(p)?)),
            Source::Memory(data) => Box::new(Cursor::new(Arc::clone(data))),
        })
    }
}

/// 条目内容
#[derive(Debug)]
pub(crate) enum EntryContent {
    /// 整读进内存（可递归）
    Buffered(Arc<[u8]>),
    /// 过大，仅保留窗口
    Windowed(Windows),
}

/// 条目读取参数
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntryLimits {
    pub(crate) max_in_memory: u64,
    pub(crate) prefix: usize,
    pub(crate) suffix: usize,
}

fn open_err(container: &str, reason: impl ToString) -> IdentifyError {
    IdentifyError::ContainerOpen { path: container.to_string(), reason: reason.to_string() }
}

/// 逐个产出容器条目；`visit` 返回错误（取消/超时）时立即停止
pub(crate) fn for_each_entry(
    kind: ContainerKind,
    source: &Source,
    container: &str,
    limits: &EntryLimits,
    deadline: &Deadline,
    visit: &mut dyn FnMut(String, Result<EntryContent>) -> Result<()>,
) -> Result<()> {
    let reader = source.open().map_err(|e| open_err(container, e))?;
    match kind {
        ContainerKind::Zip => {
            let mut archive = zip::ZipArchive::new(reader).map_err(|e| open_err(container, e))?;
            for i in 0..archive.len() {
                deadline.check()?;
                let mut file = match archive.by_index(i) {
                    Ok(f) => f,
                    Err(e) => {
                        visit(format!("#{i}"), Err(open_err(&format!("{container}::#{i}"), e)))?;
                        continue;
                    }
                };
                if file.is_dir() {
                    continue;
                }
                let name = file.name().to_string();
                let content = read_entry(&mut file, &qualify(container, &name), limits, deadline);
                drop(file);
                visit(name, content)?;
            }
            Ok(())
        }
        ContainerKind::Tar => {
            let mut archive = tar::Archive::new(reader);
            let entries = archive.entries().map_err(|e| open_err(container, e))?;
            for (i, entry) in entries.enumerate() {
                deadline.check()?;
                let mut entry = match entry {
                    Ok(e) => e,
                    Err(e) if i == 0 => return Err(open_err(container, e)),
                    Err(e) => {
                        // tar 为顺序流，条目头损坏后无法继续定位后续条目
                        visit(format!("#{i}"), Err(open_err(&format!("{container}::#{i}"), e)))?;
                        break;
                    }
                };
                if !entry.header().entry_type().is_file() {
                    continue;
                }
                let name = entry
                    .path()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_else(|_| format!("#{i}"));
                let content = read_entry(&mut entry, &qualify(container, &name), limits, deadline);
                visit(name, content)?;
            }
            Ok(())
        }
        ContainerKind::Gzip => {
            let name = gzip_member_name(container);
            let mut decoder = flate2::read::GzDecoder::new(reader);
            match read_entry(&mut decoder, &qualify(container, &name), limits, deadline) {
                Err(IdentifyError::TargetUnreadable { source, .. }) => Err(open_err(container, source)),
                other => visit(name, other),
            }
        }
    }
}

/// 容器内所有文件条目名（容器签名检查使用）
pub(crate) fn entry_names(kind: ContainerKind, source: &Source, container: &str, deadline: &Deadline) -> Result<Vec<String>> {
    let reader = source.open().map_err(|e| open_err(container, e))?;
    match kind {
        ContainerKind::Zip => {
            let archive = zip::ZipArchive::new(reader).map_err(|e| open_err(container, e))?;
            Ok(archive.file_names().map(str::to_string).collect())
        }
        ContainerKind::Tar => {
            let mut archive = tar::Archive::new(reader);
            let mut names = Vec::new();
            for entry in archive.entries().map_err(|e| open_err(container, e))? {
                deadline.check()?;
                let entry = entry.map_err(|e| open_err(container, e))?;
                if entry.header().entry_type().is_file() {
                    if let Ok(p) = entry.path() {
                        names.push(p.to_string_lossy().into_owned());
                    }
                }
            }
            Ok(names)
        }
        ContainerKind::Gzip => Ok(vec![gzip_member_name(container)]),
    }
}

/// 读取指定条目的窗口；条目不存在时返回 None
pub(crate) fn entry_windows(
    kind: ContainerKind,
    source: &Source,
    container: &str,
    entry: &str,
    buffer: usize,
    deadline: &Deadline,
) -> Result<Option<Windows>> {
    let qualified = qualify(container, entry);
    let reader = source.open().map_err(|e| open_err(container, e))?;
    match kind {
        ContainerKind::Zip => {
            let mut archive = zip::ZipArchive::new(reader).map_err(|e| open_err(container, e))?;
            let mut file = match archive.by_name(entry) {
                Ok(f) => f,
                Err(zip::result::ZipError::FileNotFound) => return Ok(None),
                Err(e) => return Err(open_err(container, e)),
            };
            window::read_stream(&mut file, &qualified, buffer, buffer, deadline).map(Some)
        }
        ContainerKind::Tar => {
            let mut archive = tar::Archive::new(reader);
            for e in archive.entries().map_err(|e| open_err(container, e))? {
                deadline.check()?;
                let mut e = e.map_err(|e| open_err(container, e))?;
                let matches = e.path().map(|p| p.to_string_lossy() == entry).unwrap_or(false);
                if matches {
                    return window::read_stream(&mut e, &qualified, buffer, buffer, deadline).map(Some);
                }
            }
            Ok(None)
        }
        ContainerKind::Gzip => {
            if entry != gzip_member_name(container) {
                return Ok(None);
            }
            let mut decoder = flate2::read::GzDecoder::new(reader);
            window::read_stream(&mut decoder, &qualified, buffer, buffer, deadline).map(Some)
        }
    }
}

/// 条目限额内整读；超出则把已读部分与剩余流拼接后按窗口读取
fn read_entry<R: Read>(reader: &mut R, name: &str, limits: &EntryLimits, deadline: &Deadline) -> Result<EntryContent> {
    let cap = usize::try_from(limits.max_in_memory).unwrap_or(usize::MAX);
    let head = window::read_bounded(reader, name, cap.saturating_add(1), deadline)?;
    if head.len() <= cap {
        return Ok(EntryContent::Buffered(Arc::from(head)));
    }
    let mut chained = Cursor::new(head).chain(reader);
    let w = window::read_stream(&mut chained, name, limits.prefix, limits.suffix, deadline)?;
    Ok(EntryContent::Windowed(w))
}

/// 条目限定名：`container::entry`
pub fn qualify(container: &str, entry: &str) -> String {
    format!("{container}::{entry}")
}

/// gzip 单成员的名字：去掉 .gz，.tgz 视为 .tar
fn gzip_member_name(container: &str) -> String {
    let last = container.rsplit("::").next().unwrap_or(container);
    let base = last.rsplit(['/', '\\']).next().unwrap_or(last);
    let lower = base.to_ascii_lowercase();
    if lower.ends_with(".tgz") {
        format!("{}.tar", &base[..base.len() - 4])
    } else if lower.ends_with(".gz") && base.len() > 3 {
        base[..base.len() - 3].to_string()
    } else {
        format!("{base}.out")
    }
}
