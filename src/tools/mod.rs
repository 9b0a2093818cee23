//! 工具模块集合
//!
//! 包含CLI、文件扫描、处理、格式化等工具模块，支持main.rs的流程控制。

pub mod batch_state;
pub mod cli;
pub mod constants;
pub mod formatter;
pub mod parallel_processor;
pub mod processor;
pub mod scanner;
pub mod utils;

// 重新导出主要的公共接口
pub use batch_state::{BatchStats, BatchStatsSnapshot};
pub use cli::{
    Action, AnalyzeOptions, AppConfig, RenderOptions, parse_args, parse_args_from,
    show_completion_info, show_startup_info,
};
pub use formatter::{
    create_output_footer, create_output_header, format_metadata, format_render_summary,
    format_reports_json, format_reports_table, write_output,
};
pub use parallel_processor::analyze_files_parallel;
pub use processor::{
    FileOutcome, FileReport, RenderSummary, analyze_and_record, analyze_file,
    analyze_files_serial, describe_file, render_file,
};
pub use scanner::{is_supported_file, scan_audio_files, show_scan_results};
