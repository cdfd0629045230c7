//! 取消令牌与单目标时间预算
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{IdentifyError, Result};

/// 调用方持有的取消令牌，可跨线程克隆共享
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// 单个目标的检查点：取消 + 超时
#[derive(Debug, Clone)]
pub(crate) struct Deadline {
    started: Instant,
    budget: Option<Duration>,
    cancel: Option<CancellationToken>,
}

impl Deadline {
    pub(crate) fn new(budget: Option<Duration>, cancel: Option<CancellationToken>) -> Self {
        Self { started: Instant::now(), budget, cancel }
    }

    /// 无预算、不可取消（用于测试与内部工具）
    #[allow(dead_code)]
    pub(crate) fn unbounded() -> Self {
        Self::new(None, None)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if let Some(token) = &self.cancel {
            if token.is_cancelled() {
                return Err(IdentifyError::Cancelled);
            }
        }
        if let Some(budget) = self.budget {
            if self.started.elapsed() > budget {
                return Err(IdentifyError::MatchTimeout { budget });
            }
        }
        Ok(())
    }
}
