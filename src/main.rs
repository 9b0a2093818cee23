//! MP3 Stream Engine - 主程序入口
//!
//! 纯流程控制器，负责协调各个工具模块完成分析、渲染和流信息查询。

use anyhow::Context;
use mp3_stream_engine::{
    error::{AudioError, ErrorCategory},
    tools::{self, Action, AnalyzeOptions, AppConfig, BatchStats, RenderOptions},
};
use std::path::Path;
use std::process;
use tracing_subscriber::EnvFilter;

/// 错误退出码定义
mod exit_codes {
    /// 通用错误
    pub const GENERAL_ERROR: i32 = 1;
    /// 格式/输入错误
    pub const FORMAT_ERROR: i32 = 2;
    /// 解码失败
    pub const DECODING_ERROR: i32 = 3;
    /// 计算错误
    pub const CALCULATION_ERROR: i32 = 4;
    /// 资源池错误
    pub const RESOURCE_ERROR: i32 = 5;
}

/// 获取错误建议文本
fn get_error_suggestion(error: &AudioError) -> &'static str {
    match error {
        AudioError::InvalidInput(_) => {
            "检查命令行参数是否正确，使用 --help 查看完整用法 / Check if command-line arguments are correct, use --help to see full usage"
        }
        AudioError::CodecNotSupported(_) => {
            "识别出了编码格式但没有对应的解码器，目前只支持 MP3 / The codec was recognised but no decoder is available; only MP3 is supported"
        }
        AudioError::PoolExhausted { .. } => {
            "解码器实例未归还，疑似资源泄漏，请降低并发度后重试 / Decoder instances were not returned; reduce parallelism and retry"
        }
        _ => match ErrorCategory::from_audio_error(error) {
            ErrorCategory::Io => {
                "检查文件路径是否正确，文件是否存在且可读 / Check if file path is correct, file exists and is readable"
            }
            ErrorCategory::Format => {
                "确保输入文件为有效的 MP3（可带 ID3 或 RIFF 封装） / Ensure input is a valid MP3 (optionally ID3-tagged or RIFF-wrapped)"
            }
            ErrorCategory::Decoding => {
                "文件可能损坏或使用不支持的音频编码 / File may be corrupted or use unsupported audio encoding"
            }
            ErrorCategory::Calculation => {
                "计算过程出现异常，请检查音频是否足够长且包含有效数据 / Calculation error occurred, check the audio is long enough and contains valid data"
            }
            ErrorCategory::Resource | ErrorCategory::Other => {
                "请检查输入文件和参数设置 / Please check input file and parameter settings"
            }
        },
    }
}

/// 错误处理和建议
fn handle_error(error: AudioError) -> ! {
    eprintln!("[ERROR] 错误 / Error: {error}");

    let category = ErrorCategory::from_audio_error(&error);
    eprintln!("[INFO] 建议 / Suggestion: {}", get_error_suggestion(&error));

    if matches!(category, ErrorCategory::Format) {
        eprintln!(
            "   Supported formats / 支持的格式: {}",
            tools::scanner::SUPPORTED_EXTENSIONS
                .iter()
                .map(|s| s.to_uppercase())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let exit_code = match &error {
        AudioError::InvalidInput(_) => exit_codes::FORMAT_ERROR,
        _ => match category {
            ErrorCategory::Format => exit_codes::FORMAT_ERROR,
            ErrorCategory::Decoding => exit_codes::DECODING_ERROR,
            ErrorCategory::Calculation => exit_codes::CALCULATION_ERROR,
            ErrorCategory::Resource => exit_codes::RESOURCE_ERROR,
            ErrorCategory::Io | ErrorCategory::Other => exit_codes::GENERAL_ERROR,
        },
    };

    process::exit(exit_code);
}

/// 安装 tracing 订阅器：RUST_LOG 优先，否则 verbose 时 debug、默认 warn
fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("无法解析日志过滤规则 / invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("日志初始化失败 / failed to install subscriber")
}

/// 分析单个文件或整个目录
fn run_analyze(options: &AnalyzeOptions, verbose: bool) -> Result<(), AudioError> {
    let stats = BatchStats::new();

    let reports = if options.is_batch_mode() {
        let audio_files = tools::scan_audio_files(&options.input_path)?;
        tools::show_scan_results(&options.input_path, &audio_files, verbose);
        if audio_files.is_empty() {
            return Ok(());
        }

        let degree = tools::utils::effective_parallel_degree(
            options.parallel_files,
            audio_files.len(),
        );
        if degree == 1 {
            if verbose {
                println!("[INFO] 并发度为1，使用串行模式 / Parallelism=1, using serial mode");
            }
            tools::analyze_files_serial(&audio_files, options, &stats, verbose)
        } else {
            match tools::analyze_files_parallel(&audio_files, options, degree, &stats, verbose) {
                Ok(reports) => reports,
                Err(e) => {
                    eprintln!("[WARNING] 并行处理失败 / Parallel processing failed: {e}，回退到串行模式 / fallback to serial");
                    let stats = BatchStats::new();
                    let reports =
                        tools::analyze_files_serial(&audio_files, options, &stats, verbose);
                    return emit_reports(options, &reports, &stats);
                }
            }
        }
    } else {
        // 单文件模式：失败直接返回错误，交给 handle_error
        let result = tools::analyze_file(&options.input_path, options)?;
        stats.inc_processed();
        vec![tools::FileReport::new(&options.input_path, Ok(result))]
    };

    emit_reports(options, &reports, &stats)
}

fn emit_reports(
    options: &AnalyzeOptions,
    reports: &[tools::FileReport],
    stats: &BatchStats,
) -> Result<(), AudioError> {
    let text = if options.json {
        tools::format_reports_json(reports)?
    } else {
        let mut text = tools::create_output_header();
        text.push_str(&tools::format_reports_table(reports));
        text.push('\n');
        if reports.len() > 1 {
            text.push_str(&tools::create_output_footer(&stats.snapshot()));
        }
        text
    };
    tools::write_output(&text, options.output_path.as_deref())
}

fn run_render(options: &RenderOptions, verbose: bool) -> Result<(), AudioError> {
    if verbose {
        println!(
            "[PROCESSING] 渲染 / Rendering: {} -> {}",
            options.input_path.display(),
            options.output_path.display()
        );
    }
    let summary = tools::render_file(options)?;
    println!("{}", tools::format_render_summary(&summary));
    Ok(())
}

fn run_info(input_path: &Path) -> Result<(), AudioError> {
    let metadata = tools::describe_file(input_path)?;
    println!("{}", tools::format_metadata(input_path, &metadata));
    Ok(())
}

/// 应用程序主逻辑（便于测试和复用）
fn run(config: &AppConfig) -> Result<(), AudioError> {
    tools::show_startup_info(config);

    match &config.action {
        Action::Analyze(options) => run_analyze(options, config.verbose),
        Action::Render(options) => run_render(options, config.verbose),
        Action::Info { input_path } => run_info(input_path),
    }?;

    tools::show_completion_info(config);
    Ok(())
}

fn main() {
    let config = match tools::parse_args() {
        Ok(config) => config,
        Err(error) => handle_error(error),
    };

    if let Err(e) = init_tracing(config.verbose) {
        eprintln!("[WARNING] {e:#}");
    }

    if let Err(error) = run(&config) {
        handle_error(error);
    }
}
