//! 工具函数模块
//!
//! 提供电平/时间的显示格式化、文件路径处理等通用工具函数。

/// 音频值转换工具函数
pub mod audio {
    /// 将线性峰值转换为 dBFS
    #[inline]
    pub fn linear_to_db(value: f64) -> f64 {
        if value > 0.0 {
            20.0 * value.log10()
        } else {
            -f64::INFINITY
        }
    }

    /// 线性峰值格式化为 dBFS 字符串（用于表格输出）
    pub fn peak_db_string(value: f64) -> String {
        if value > 0.0 {
            format!("{:.2}", linear_to_db(value))
        } else {
            "-inf".to_string()
        }
    }

    /// 可缺省的 dB/LU 值
    pub fn optional_db_string(value: Option<f64>) -> String {
        value.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
    }

    /// 秒数格式化为 `m:ss.mmm`
    pub fn duration_string(seconds: f64) -> String {
        let millis = (seconds.max(0.0) * 1000.0).round() as u64;
        format!(
            "{}:{:02}.{:03}",
            millis / 60_000,
            (millis / 1000) % 60,
            millis % 1000
        )
    }
}

/// 文件路径处理工具函数
pub mod path {
    use std::path::Path;

    /// 提取文件名（返回String，用于日志显示）
    #[inline]
    pub fn extract_filename_lossy(path: &Path) -> String {
        path.file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }

    /// 提取文件stem（不含扩展名）
    #[inline]
    pub fn extract_file_stem_string(path: &Path) -> String {
        path.file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("audio")
            .to_string()
    }
}

/// 实际使用的并发度：不超过文件数，至少为 1
pub fn effective_parallel_degree(requested: usize, file_count: usize) -> usize {
    requested.min(file_count).max(1)
}

pub use audio::{duration_string, linear_to_db, optional_db_string, peak_db_string};
pub use path::{extract_file_stem_string, extract_filename_lossy};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_formatting() {
        assert!((linear_to_db(0.5) + 6.0206).abs() < 1e-3);
        assert_eq!(peak_db_string(0.0), "-inf");
        assert_eq!(peak_db_string(1.0), "0.00");
        assert_eq!(optional_db_string(None), "-");
        assert_eq!(optional_db_string(Some(-3.14159)), "-3.14");
    }

    #[test]
    fn test_duration_string() {
        assert_eq!(duration_string(0.0), "0:00.000");
        assert_eq!(duration_string(75.5), "1:15.500");
    }

    #[test]
    fn test_parallel_degree() {
        assert_eq!(effective_parallel_degree(4, 2), 2);
        assert_eq!(effective_parallel_degree(4, 0), 1);
        assert_eq!(effective_parallel_degree(1, 10), 1);
    }
}
