//! 文件格式识别核心库
//!
//! 设计要点：
//! - 按字节签名（PRONOM 风格，以 PUID 为键）识别文件、归档条目、流与目录树。
//! - 只读取有界的前缀/后缀窗口；签名先经 Aho-Corasick 锚点预筛，再精确匹配。
//! - 多个命中按“取代关系 → 命中跨度 → 目录顺序”裁决，结果确定且可复现。
//! - 单个目标的失败只体现在该目标的结果中，扫描继续。

mod cancel;
mod catalog;
mod container;
mod engine;
mod error;
mod findings;
mod options;
mod output;
mod pattern;
mod prefilter;
mod scan;
mod types;
mod window;

pub use cancel::CancellationToken;
pub use catalog::{Catalog, ContainerFile, ContainerSignature, FormatSignature, VERSIONS_FILE};
pub use container::{is_container_format, qualify, ContainerKind};
pub use engine::{engine_version, Identifier};
pub use error::{ErrorKind, IdentifyError, Result, TargetError};
pub use options::{
    IdentifyOptions, ResultOrder, ScanOptions, ScanStats, DEFAULT_BUFFER_SIZE, DEFAULT_CONTAINER_BUFFER_SIZE,
    DEFAULT_MAX_IN_MEMORY_ENTRY, DEFAULT_MAX_NESTING_DEPTH,
};
pub use output::{parse_line, parse_lines, render_line, write_result, OutputFormat, ParseLineError, ResultLine, ABSENT};
pub use pattern::{parse_pattern, Anchor, ByteSequence, ByteSignature, PatternError, SequenceMatch, SubPattern};
pub use scan::{scan_and_write, Scan};
pub use types::{FormatMatch, IdentificationResult, MatchType, Outcome, OutputItem};
pub use window::Windows;
