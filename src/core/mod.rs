//! 核心算法模块
//!
//! EBU R128 响度测量与声学指纹。

pub mod fingerprint;
pub mod k_filter;
pub mod loudness;
pub mod true_peak;

pub use fingerprint::Fingerprinter;
pub use loudness::{
    LoudnessConfig, LoudnessMeter, LoudnessResult, LoudnessSummary, gated_loudness_of,
};
