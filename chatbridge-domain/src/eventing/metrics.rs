//! 总线运行指标
//!
//! 以原子计数器记录发布、投递、重试与死信等信号，供健康检查或导出使用。
//!
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct BusMetrics {
    published: AtomicU64,
    dropped: AtomicU64,
    scheduled: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    dead_letter_errors: AtomicU64,
    abandoned: AtomicU64,
}

/// 指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// 受理的事件数
    pub published: u64,
    /// 因无订阅者被丢弃的事件数
    pub dropped: u64,
    /// 已安排的 (事件, 处理器) 投递数
    pub scheduled: u64,
    pub succeeded: u64,
    /// 安排的重试次数
    pub retried: u64,
    pub dead_lettered: u64,
    /// 写入死信存储失败的次数
    pub dead_letter_errors: u64,
    /// 因关闭而放弃的投递数
    pub abandoned: u64,
}

impl BusMetrics {
    pub(crate) fn incr_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_dead_letter_errors(&self) {
        self.dead_letter_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_abandoned(&self, n: u64) {
        self.abandoned.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            scheduled: self.scheduled.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            dead_letter_errors: self.dead_letter_errors.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}
