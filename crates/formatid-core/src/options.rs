//! 识别选项、扫描选项与统计信息（模块）
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::cancel::CancellationToken;

/// 默认前缀/后缀窗口大小（字节），覆盖绝大多数签名的偏移范围
pub const DEFAULT_BUFFER_SIZE: usize = 128 * 1024;
/// 默认容器内条目窗口大小（字节）
pub const DEFAULT_CONTAINER_BUFFER_SIZE: usize = 512 * 1024;
/// 容器递归深度上限
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 10;
/// 容器条目整读进内存的上限；超出则只按窗口识别、不再递归
pub const DEFAULT_MAX_IN_MEMORY_ENTRY: u64 = 64 * 1024 * 1024;

/// 识别选项
/// 可由 TOML 配置文件反序列化（缺省字段取默认值）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentifyOptions {
    /// 仅匹配这些 PUID（为空表示不限制）
    pub include_formats: HashSet<String>,
    /// 永不匹配这些 PUID
    pub exclude_formats: HashSet<String>,
    /// 前缀窗口大小；需要时后缀窗口同样大小
    pub buffer_size: usize,
    /// 容器签名检查时读取条目的窗口大小
    pub container_buffer_size: usize,
    /// 识别为容器格式时是否展开其条目
    pub expand_containers: bool,
    /// 展开时是否同时报告容器本身
    pub report_containers: bool,
    /// 是否启用容器签名（如 ZIP 内含 word/document.xml 则为 DOCX）
    pub container_signatures: bool,
    /// 无签名命中时是否按扩展名兜底
    pub match_extensions: bool,
    /// 抑制信息级输出
    pub quiet: bool,
    /// 额外/覆盖的签名文件（TOML），按顺序加载
    pub catalog_paths: Vec<PathBuf>,
    /// 配置目录（含 versions.toml）
    pub conf_dir: Option<PathBuf>,
    pub max_nesting_depth: usize,
    pub max_in_memory_entry: u64,
    /// 单目标时间预算（毫秒）；None 表示不限
    pub timeout_ms: Option<u64>,
}

impl Default for IdentifyOptions {
    fn default() -> Self {
        Self {
            include_formats: HashSet::new(),
            exclude_formats: HashSet::new(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            container_buffer_size: DEFAULT_CONTAINER_BUFFER_SIZE,
            expand_containers: false,
            report_containers: false,
            container_signatures: true,
            match_extensions: false,
            quiet: false,
            catalog_paths: Vec::new(),
            conf_dir: None,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            max_in_memory_entry: DEFAULT_MAX_IN_MEMORY_ENTRY,
            timeout_ms: None,
        }
    }
}

impl IdentifyOptions {
    /// 从 TOML 文件读取选项
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let txt = std::fs::read_to_string(path)
            .with_context(|| format!("read options file {}", path.display()))?;
        let opts: IdentifyOptions = toml::from_str(&txt)
            .with_context(|| format!("parse options file {}", path.display()))?;
        Ok(opts)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// 结果输出顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultOrder {
    /// 严格按输入顺序（需要重排缓冲）
    #[default]
    Input,
    /// 先完成先输出
    Completion,
}

/// 扫描选项（目标遍历与并行调度）
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// 目录目标是否递归
    pub recursive: bool,
    /// 是否展开归档；None 表示沿用 IdentifyOptions::expand_containers
    pub expand_archives: Option<bool>,
    /// 线程数：None 表示自动（等于 CPU 核数）；Some(1) 走串行
    pub threads: Option<usize>,
    pub order: ResultOrder,
    pub cancel: Option<CancellationToken>,
}

/// 扫描统计信息（便于 CLI 打印）
#[derive(Debug, Default, Clone)]
pub struct ScanStats {
    pub targets_scanned: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub errors: usize,
    pub outputs_written: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let opts: IdentifyOptions = toml::from_str(
            r#"
            include_formats = ["fmt/18"]
            expand_containers = true
            timeout_ms = 500
            "#,
        )
        .unwrap();
        assert!(opts.include_formats.contains("fmt/18"));
        assert!(opts.expand_containers);
        assert_eq!(opts.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(opts.timeout(), Some(Duration::from_millis(500)));
        assert!(opts.container_signatures);
    }
}
