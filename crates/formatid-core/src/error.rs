//! 错误分类（启动期错误 vs 单目标错误）
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// 引擎错误
/// - `CatalogLoad` / `InvalidOptions`：启动期错误，直接中止整个运行
/// - 其余：单目标错误，转换为该目标的 `Error` 结果，扫描继续
#[derive(Debug, Error)]
pub enum IdentifyError {
    #[error("failed to load catalog {path}: {reason}")]
    CatalogLoad { path: PathBuf, reason: String },

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("cannot read target {path}: {source}")]
    TargetUnreadable {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot open container {path}: {reason}")]
    ContainerOpen { path: String, reason: String },

    #[error("matching exceeded time budget of {budget:?}")]
    MatchTimeout { budget: Duration },

    #[error("identification cancelled")]
    Cancelled,
}

impl IdentifyError {
    pub(crate) fn catalog(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        IdentifyError::CatalogLoad { path: path.into(), reason: reason.to_string() }
    }

    pub(crate) fn unreadable(path: impl Into<String>, source: io::Error) -> Self {
        IdentifyError::TargetUnreadable { path: path.into(), source }
    }

    /// 将单目标错误映射为结果中的错误描述；启动期错误返回 None
    pub fn to_target_error(&self) -> Option<TargetError> {
        let kind = match self {
            IdentifyError::TargetUnreadable { .. } => ErrorKind::TargetUnreadable,
            IdentifyError::ContainerOpen { .. } => ErrorKind::ContainerOpen,
            IdentifyError::MatchTimeout { .. } => ErrorKind::MatchTimeout,
            IdentifyError::Cancelled => ErrorKind::Cancelled,
            IdentifyError::CatalogLoad { .. } | IdentifyError::InvalidOptions(_) => return None,
        };
        Some(TargetError { kind, message: self.to_string() })
    }
}

/// 结果中记录的错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TargetUnreadable,
    ContainerOpen,
    MatchTimeout,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TargetUnreadable => "target_unreadable",
            ErrorKind::ContainerOpen => "container_open",
            ErrorKind::MatchTimeout => "match_timeout",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "target_unreadable" => Some(ErrorKind::TargetUnreadable),
            "container_open" => Some(ErrorKind::ContainerOpen),
            "match_timeout" => Some(ErrorKind::MatchTimeout),
            "cancelled" => Some(ErrorKind::Cancelled),
            _ => None,
        }
    }
}

/// 单目标错误（结果记录的一部分）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetError {
    pub kind: ErrorKind,
    pub message: String,
}

pub type Result<T, E = IdentifyError> = std::result::Result<T, E>;
