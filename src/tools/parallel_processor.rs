//! 多文件并行处理模块
//!
//! 使用rayon实现文件级并行处理，保证输出顺序一致性。
//! 每个工作线程为每个文件构造独立的管线资源，线程间不共享解码器。

use super::batch_state::BatchStats;
use super::cli::AnalyzeOptions;
use super::processor::{FileReport, analyze_and_record};
use crate::error::{AudioError, AudioResult};
use rayon::prelude::*;
use std::io::Write;
use std::path::PathBuf;

/// 有序结果容器（保证输出顺序）
struct OrderedResult {
    /// 原始文件索引（用于排序）
    index: usize,
    report: FileReport,
}

/// 多文件并行分析；结果顺序与 `audio_files` 一致
pub fn analyze_files_parallel(
    audio_files: &[PathBuf],
    options: &AnalyzeOptions,
    parallel_degree: usize,
    stats: &BatchStats,
    verbose: bool,
) -> AudioResult<Vec<FileReport>> {
    println!("启用多文件并行处理 / Parallel processing: {parallel_degree} 并发度");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallel_degree)
        .thread_name(|i| format!("analysis-worker-{i}"))
        .build()
        .map_err(|e| AudioError::InvalidInput(format!("线程池创建失败: {e}")))?;

    let results: Vec<OrderedResult> = pool.install(|| {
        audio_files
            .par_iter()
            .enumerate()
            .map(|(index, audio_file)| {
                if !verbose {
                    print!(".");
                    std::io::stdout().flush().ok();
                }
                OrderedResult {
                    index,
                    report: analyze_and_record(audio_file, options, stats, verbose),
                }
            })
            .collect()
    });

    if !verbose {
        println!();
    }

    let mut sorted = results;
    sorted.sort_by_key(|r| r.index);
    Ok(sorted.into_iter().map(|r| r.report).collect())
}
