//! 命令行接口模块
//!
//! 负责命令行参数解析和程序信息展示。三个子命令：analyze / render / info。

use super::constants::defaults;
use crate::error::{AudioError, AudioResult};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use std::ffi::OsString;
use std::path::PathBuf;

/// 应用程序版本信息
const VERSION: &str = env!("CARGO_PKG_VERSION");
const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// analyze 子命令的选项
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzeOptions {
    /// 单个文件或扫描目录
    pub input_path: PathBuf,
    pub fingerprint: bool,
    pub loudness: bool,
    pub json: bool,
    pub output_path: Option<PathBuf>,
    /// 文件级并发度；1 为串行
    pub parallel_files: usize,
}

impl AnalyzeOptions {
    /// 基于路径类型判断是否为批量模式
    #[inline]
    pub fn is_batch_mode(&self) -> bool {
        self.input_path.is_dir()
    }
}

/// render 子命令的选项
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// 起始时间（秒），大于 0 时先定位
    pub start: f64,
    /// 渲染时长（秒），None 表示到结尾
    pub duration: Option<f64>,
    pub sample_rate: u32,
    pub channels: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Analyze(AnalyzeOptions),
    Render(RenderOptions),
    Info { input_path: PathBuf },
}

/// 应用程序配置
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub action: Action,
    /// 是否显示详细信息（同时把默认日志级别提到 debug）
    pub verbose: bool,
}

/// 构造命令定义
pub fn build_command() -> Command {
    let input = |help: &'static str| Arg::new("INPUT").help(help).required(true).index(1);

    Command::new("mp3-engine")
        .version(VERSION)
        .about(DESCRIPTION)
        .author("MP3 Stream Engine Team")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .help("显示详细处理信息")
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("analyze")
                .about("分析时长、声学指纹和 EBU R128 响度")
                .arg(input("音频文件，或要递归扫描的目录（.mp3 / .wav）"))
                .arg(
                    Arg::new("no-fingerprint")
                        .long("no-fingerprint")
                        .help("不计算声学指纹")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("no-loudness")
                        .long("no-loudness")
                        .help("不测量响度")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("以 JSON 输出结果")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .help("输出结果到文件")
                        .value_name("FILE"),
                )
                .arg(
                    Arg::new("parallel")
                        .long("parallel")
                        .short('p')
                        .help("并行处理的文件数（1 为串行）")
                        .value_name("N")
                        .value_parser(value_parser!(usize))
                        .default_value("4"),
                ),
        )
        .subcommand(
            Command::new("render")
                .about("经播放管线解码、混音、重采样后写出 32 位浮点 WAV")
                .arg(input("MP3 文件"))
                .arg(
                    Arg::new("out")
                        .long("out")
                        .help("输出 WAV 路径")
                        .value_name("FILE")
                        .required(true),
                )
                .arg(
                    Arg::new("start")
                        .long("start")
                        .help("起始时间（秒）")
                        .value_name("SECONDS")
                        .value_parser(value_parser!(f64))
                        .default_value("0"),
                )
                .arg(
                    Arg::new("duration")
                        .long("duration")
                        .help("渲染时长（秒），默认到结尾")
                        .value_name("SECONDS")
                        .value_parser(value_parser!(f64)),
                )
                .arg(
                    Arg::new("rate")
                        .long("rate")
                        .help("输出采样率")
                        .value_name("HZ")
                        .value_parser(value_parser!(u32))
                        .default_value("44100"),
                )
                .arg(
                    Arg::new("channels")
                        .long("channels")
                        .help("输出声道数")
                        .value_name("N")
                        .value_parser(value_parser!(usize))
                        .default_value("2"),
                ),
        )
        .subcommand(
            Command::new("info")
                .about("打印解复用得到的流信息")
                .arg(input("MP3 文件")),
        )
}

/// 从已解析的参数构造配置
pub fn config_from_matches(matches: &ArgMatches) -> AudioResult<AppConfig> {
    let verbose = matches.get_flag("verbose")
        || matches
            .subcommand()
            .is_some_and(|(_, m)| m.get_flag("verbose"));
    let path = |m: &ArgMatches, id: &str| m.get_one::<String>(id).map(PathBuf::from);

    let action = match matches.subcommand() {
        Some(("analyze", m)) => Action::Analyze(AnalyzeOptions {
            input_path: path(m, "INPUT").unwrap_or_default(),
            fingerprint: !m.get_flag("no-fingerprint"),
            loudness: !m.get_flag("no-loudness"),
            json: m.get_flag("json"),
            output_path: path(m, "output"),
            parallel_files: m
                .get_one::<usize>("parallel")
                .copied()
                .unwrap_or(defaults::PARALLEL_FILES_DEGREE)
                .max(1),
        }),
        Some(("render", m)) => {
            let start = m.get_one::<f64>("start").copied().unwrap_or(0.0);
            let duration = m.get_one::<f64>("duration").copied();
            if !start.is_finite() || start < 0.0 {
                return Err(AudioError::InvalidInput(format!("非法起始时间: {start}")));
            }
            if let Some(d) = duration
                && !(d > 0.0)
            {
                return Err(AudioError::InvalidInput(format!("非法渲染时长: {d}")));
            }
            Action::Render(RenderOptions {
                input_path: path(m, "INPUT").unwrap_or_default(),
                output_path: path(m, "out").unwrap_or_default(),
                start,
                duration,
                sample_rate: m
                    .get_one::<u32>("rate")
                    .copied()
                    .unwrap_or(defaults::OUTPUT_SAMPLE_RATE),
                channels: m
                    .get_one::<usize>("channels")
                    .copied()
                    .unwrap_or(defaults::OUTPUT_CHANNELS),
            })
        }
        Some(("info", m)) => Action::Info {
            input_path: path(m, "INPUT").unwrap_or_default(),
        },
        _ => return Err(AudioError::InvalidInput("缺少子命令".into())),
    };

    Ok(AppConfig { action, verbose })
}

/// 解析进程命令行；--help / --version / 用法错误由 clap 直接退出
pub fn parse_args() -> AudioResult<AppConfig> {
    config_from_matches(&build_command().get_matches())
}

/// 解析给定参数（测试与嵌入使用）
pub fn parse_args_from<I, T>(args: I) -> AudioResult<AppConfig>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = build_command()
        .try_get_matches_from(args)
        .map_err(|e| AudioError::InvalidInput(e.to_string()))?;
    config_from_matches(&matches)
}

/// 显示程序启动信息
pub fn show_startup_info(config: &AppConfig) {
    println!("MP3 Stream Engine v{VERSION}");
    if config.verbose {
        println!("{DESCRIPTION}");
        println!();
    }
}

/// 显示程序完成信息
pub fn show_completion_info(config: &AppConfig) {
    if config.verbose {
        println!("[OK] 所有任务处理完成 / All tasks completed");
    }
}
