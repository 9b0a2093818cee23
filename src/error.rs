//! 统一错误处理框架
//!
//! 引擎各层（字节窗口、解复用、解码、分析管线）共用的错误类型定义。

use std::fmt;
use std::io;

/// 音频引擎统一错误类型
#[derive(Debug)]
pub enum AudioError {
    /// 输入验证错误（参数非法、状态不对）
    InvalidInput(String),

    /// 文件I/O错误
    IoError(io::Error),

    /// 容器格式不支持或损坏（解复用失败、时长不足等）
    UnsupportedFormat(String),

    /// 嗅探出了格式，但没有对应的解码器插件
    CodecNotSupported(String),

    /// 读取越过字节源末尾
    UnexpectedEof { offset: u64, length: u64, size: u64 },

    /// 资源池同一key分配的实例数超过上限（疑似泄漏）
    PoolExhausted { key: String, allocated: usize },

    /// 解码错误
    DecodingError(String),

    /// 计算异常（指纹长度不足等）
    CalculationError(String),
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioError::InvalidInput(msg) => write!(f, "输入验证失败: {msg}"),
            AudioError::IoError(err) => write!(f, "文件I/O错误: {err}"),
            AudioError::UnsupportedFormat(msg) => write!(f, "不支持的音频格式: {msg}"),
            AudioError::CodecNotSupported(codec) => write!(f, "没有可用的解码器: {codec}"),
            AudioError::UnexpectedEof {
                offset,
                length,
                size,
            } => write!(
                f,
                "读取越界: offset={offset} length={length} 超出源大小 {size}"
            ),
            AudioError::PoolExhausted { key, allocated } => {
                write!(f, "资源池耗尽（可能存在泄漏）: {key} 已分配 {allocated} 个实例")
            }
            AudioError::DecodingError(msg) => write!(f, "音频解码失败: {msg}"),
            AudioError::CalculationError(msg) => write!(f, "计算异常: {msg}"),
        }
    }
}

impl std::error::Error for AudioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AudioError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for AudioError {
    fn from(err: io::Error) -> Self {
        AudioError::IoError(err)
    }
}

impl From<hound::Error> for AudioError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => AudioError::IoError(e),
            other => AudioError::InvalidInput(format!("WAV写出错误: {other}")),
        }
    }
}

impl From<symphonia::core::errors::Error> for AudioError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        match err {
            symphonia::core::errors::Error::IoError(e) => AudioError::IoError(e),
            symphonia::core::errors::Error::Unsupported(what) => {
                AudioError::CodecNotSupported(what.to_string())
            }
            other => AudioError::DecodingError(format!("symphonia错误: {other}")),
        }
    }
}

impl AudioError {
    /// I/O类错误中可以重试的那一部分（中断、超时、暂不可用）
    pub fn is_retryable(&self) -> bool {
        match self {
            AudioError::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

/// 音频处理操作的标准Result类型
pub type AudioResult<T> = Result<T, AudioError>;

// ==================== 错误转换Helper函数 ====================

/// 创建格式错误的helper函数
#[inline]
pub fn format_error<E: fmt::Display>(context: &str, err: E) -> AudioError {
    AudioError::UnsupportedFormat(format!("{context}: {err}"))
}

/// 创建解码错误的helper函数
#[inline]
pub fn decoding_error<E: fmt::Display>(context: &str, err: E) -> AudioError {
    AudioError::DecodingError(format!("{context}: {err}"))
}

/// 创建计算错误的helper函数
#[inline]
pub fn calculation_error<E: fmt::Display>(context: &str, err: E) -> AudioError {
    AudioError::CalculationError(format!("{context}: {err}"))
}

// ==================== 错误分类系统 ====================
// 用于管线错误上报和批量处理统计

/// 错误类别枚举
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// 格式相关错误（不支持的格式、缺少解码器等）
    Format,
    /// 解码相关错误
    Decoding,
    /// I/O相关错误（含读取越界）
    Io,
    /// 计算相关错误
    Calculation,
    /// 资源池相关错误
    Resource,
    /// 其他未分类错误
    Other,
}

impl ErrorCategory {
    /// 从AudioError提取错误类别
    pub fn from_audio_error(e: &AudioError) -> Self {
        match e {
            AudioError::UnsupportedFormat(_) | AudioError::CodecNotSupported(_) => Self::Format,
            AudioError::DecodingError(_) => Self::Decoding,
            AudioError::IoError(_) | AudioError::UnexpectedEof { .. } => Self::Io,
            AudioError::CalculationError(_) => Self::Calculation,
            AudioError::PoolExhausted { .. } => Self::Resource,
            AudioError::InvalidInput(_) => Self::Other,
        }
    }

    /// 获取错误类别的显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Format => "格式错误",
            Self::Decoding => "解码错误",
            Self::Io => "I/O错误",
            Self::Calculation => "计算错误",
            Self::Resource => "资源错误",
            Self::Other => "其他错误",
        }
    }
}
