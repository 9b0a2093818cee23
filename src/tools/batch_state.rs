//! 批处理状态管理模块
//!
//! 成功/失败计数和按错误类别归档的失败文件，串行和并行模式共用。

use crate::error::ErrorCategory;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 批处理统计快照
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchStatsSnapshot {
    pub processed: usize,
    pub failed: usize,
    /// 错误类别显示名 → 失败文件列表
    pub error_stats: BTreeMap<&'static str, Vec<String>>,
}

impl BatchStatsSnapshot {
    pub fn total(&self) -> usize {
        self.processed + self.failed
    }

    /// 成功率（百分比）
    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        self.processed as f64 / self.total() as f64 * 100.0
    }
}

/// 线程安全的批处理统计
#[derive(Debug, Default)]
pub struct BatchStats {
    processed: AtomicUsize,
    failed: AtomicUsize,
    error_stats: Mutex<BTreeMap<&'static str, Vec<String>>>,
}

impl BatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 增加成功处理计数，返回新的计数
    #[inline]
    pub fn inc_processed(&self) -> usize {
        self.processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// 增加失败计数并记录错误分类
    pub fn inc_failed(&self, category: ErrorCategory, filename: String) -> usize {
        let count = self.failed.fetch_add(1, Ordering::Relaxed) + 1;
        if let Ok(mut stats) = self.error_stats.lock() {
            stats
                .entry(category.display_name())
                .or_default()
                .push(filename);
        }
        count
    }

    pub fn snapshot(&self) -> BatchStatsSnapshot {
        BatchStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            error_stats: self
                .error_stats
                .lock()
                .map(|stats| stats.clone())
                .unwrap_or_default(),
        }
    }
}
