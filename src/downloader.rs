use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{CutterError, CutterResult};
use crate::transcoder::{resolve_binary, run_tool};

/// 远程视频下载能力
pub trait VideoDownloader: Send + Sync {
    /// 下载到 `dest_dir`，返回本地文件路径
    fn download(&self, url: &str, dest_dir: &Path) -> CutterResult<PathBuf>;
}

/// 基于 yt-dlp 命令行的下载器
#[derive(Debug, Clone)]
pub struct YtDlpDownloader {
    binary: PathBuf,
}

impl YtDlpDownloader {
    pub fn new(binary: &str) -> Self {
        Self {
            binary: resolve_binary(binary),
        }
    }
}

impl VideoDownloader for YtDlpDownloader {
    fn download(&self, url: &str, dest_dir: &Path) -> CutterResult<PathBuf> {
        std::fs::create_dir_all(dest_dir)?;
        let template = dest_dir.join("%(title)s.%(ext)s");
        info!("⏳ [视频下载] 正在下载: {}", url);

        let output = run_tool(
            "yt-dlp",
            &self.binary,
            [
                OsStr::new("-f"),
                OsStr::new("best[ext=mp4]/best"),
                OsStr::new("--no-playlist"),
                OsStr::new("--print"),
                OsStr::new("after_move:filepath"),
                OsStr::new("-o"),
                template.as_os_str(),
                OsStr::new(url),
            ],
        )?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let path = downloaded_path(&stdout).ok_or_else(|| CutterError::input_not_found(dest_dir))?;
        if !path.exists() {
            return Err(CutterError::input_not_found(path));
        }
        info!("✅ [视频下载] 下载完成: {}", path.display());
        Ok(path)
    }
}

/// yt-dlp 用 `--print after_move:filepath` 输出的最后一个非空行
fn downloaded_path(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(PathBuf::from)
}
