//! 文件扫描模块
//!
//! 递归扫描目录中的 .mp3 / .wav 文件。

use super::utils;
use crate::error::{AudioError, AudioResult};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 支持的音频格式扩展名
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "wav"];

/// 扩展名（不区分大小写）在支持列表中
pub fn is_supported_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// 扫描目录中的音频文件，按路径排序
pub fn scan_audio_files(dir_path: &Path) -> AudioResult<Vec<PathBuf>> {
    if !dir_path.exists() {
        return Err(AudioError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("目录不存在: {}", dir_path.display()),
        )));
    }

    if !dir_path.is_dir() {
        return Err(AudioError::InvalidInput(format!(
            "路径不是目录: {}",
            dir_path.display()
        )));
    }

    let mut audio_files: Vec<PathBuf> = WalkDir::new(dir_path)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                tracing::warn!("跳过无法读取的目录项: {err}");
                None
            }
        })
        .filter(|e| e.file_type().is_file() && is_supported_file(e.path()))
        .map(|e| e.into_path())
        .collect();

    audio_files.sort();
    Ok(audio_files)
}

/// 显示文件扫描结果
pub fn show_scan_results(dir_path: &Path, audio_files: &[PathBuf], verbose: bool) {
    if audio_files.is_empty() {
        println!("[WARNING] 在目录 {} 中没有找到支持的音频文件", dir_path.display());
        println!("   支持的格式 / Supported formats: MP3, WAV");
        return;
    }

    println!("扫描目录 / Scanning: {}", dir_path.display());
    println!("找到 {} 个音频文件 / audio files found", audio_files.len());

    if verbose {
        for (i, file) in audio_files.iter().enumerate() {
            println!("   {}. {}", i + 1, utils::extract_filename_lossy(file));
        }
    }
    println!();
}
