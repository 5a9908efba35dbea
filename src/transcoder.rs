//! 外部转码工具（ffmpeg 命令行）的封装
//!
//! 所有调用都用结构化参数构建，不拼接 shell 字符串。
//! 成功的判定同时要求进程退出码为 0 且输出文件存在。

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::{debug, warn};

use crate::error::{CutterError, CutterResult};

/// 转码能力：切片、提取音频、拼接
pub trait Transcoder: Send + Sync {
    /// 切出 `[start, start + duration)`，重新编码视频和音频
    fn cut_video(&self, input: &Path, start: f64, duration: f64, output: &Path) -> CutterResult<()>;

    /// 提取音频；`range` 为 `(start, duration)`，为空时提取整段
    fn extract_audio(&self, input: &Path, range: Option<(f64, f64)>, output: &Path) -> CutterResult<()>;

    /// 按清单文件做流拷贝拼接
    fn concat(&self, manifest: &Path, output: &Path) -> CutterResult<()>;
}

/// ffmpeg 命令构建器
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    /// `-i` 之前的参数
    input_args: Vec<OsString>,
    /// `-i` 之后的参数
    output_args: Vec<OsString>,
    log_level: String,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            log_level: "error".to_string(),
        }
    }

    pub fn input_arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.input_args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn output_arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.output_args.push(arg.as_ref().to_os_string());
        self
    }

    /// 输入端跳转（毫秒精度）
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    pub fn duration(self, seconds: f64) -> Self {
        self.input_arg("-t").input_arg(format!("{:.3}", seconds))
    }

    pub fn video_codec(self, codec: &str) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: &str) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// 去掉视频流，音频使用最高 VBR 质量
    pub fn audio_only(self) -> Self {
        self.output_arg("-vn").output_arg("-q:a").output_arg("0")
    }

    /// 以 concat 分离器读取清单文件
    pub fn concat_demuxer(self) -> Self {
        self.input_arg("-f").input_arg("concat").input_arg("-safe").input_arg("0")
    }

    /// 流拷贝，不重新编码
    pub fn stream_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    pub fn build_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-y".into(), "-v".into(), self.log_level.clone().into()];
        args.extend(self.input_args.iter().cloned());
        args.push("-i".into());
        args.push(self.input.clone().into_os_string());
        args.extend(self.output_args.iter().cloned());
        args.push(self.output.clone().into_os_string());
        args
    }
}

/// 在 PATH 中查找可执行文件，找不到时原样返回，交给启动时报错
pub fn resolve_binary(name: &str) -> PathBuf {
    which::which(name).unwrap_or_else(|_| PathBuf::from(name))
}

/// 运行外部工具并收集输出，非零退出码转换为 `ExternalToolFailure`
pub(crate) fn run_tool<I, S>(tool: &str, program: &Path, args: I) -> CutterResult<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null());
    debug!("[外部工具] 执行: {:?}", command);

    let output = command.output().map_err(|e| {
        CutterError::tool_failed(
            tool,
            format!("无法启动 {}: {}", program.display(), e),
            None,
            None,
        )
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!("⚠️  [外部工具] {} 退出码 {:?}: {}", tool, output.status.code(), stderr);
        return Err(CutterError::tool_failed(
            tool,
            "进程返回非零退出码",
            (!stderr.is_empty()).then_some(stderr),
            output.status.code(),
        ));
    }
    Ok(output)
}

/// 基于 ffmpeg 命令行的转码器
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: PathBuf,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegTranscoder {
    pub fn new(binary: &str) -> Self {
        Self {
            binary: resolve_binary(binary),
        }
    }

    fn run(&self, command: FfmpegCommand) -> CutterResult<()> {
        let output = run_tool("ffmpeg", &self.binary, command.build_args())?;
        let path = command.output_path();
        if !path.exists() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(CutterError::tool_failed(
                "ffmpeg",
                format!("输出文件不存在: {}", path.display()),
                (!stderr.is_empty()).then_some(stderr),
                output.status.code(),
            ));
        }
        Ok(())
    }
}

impl Transcoder for FfmpegTranscoder {
    fn cut_video(&self, input: &Path, start: f64, duration: f64, output: &Path) -> CutterResult<()> {
        self.run(
            FfmpegCommand::new(input, output)
                .seek(start)
                .duration(duration)
                .video_codec("libx264")
                .audio_codec("aac"),
        )
    }

    fn extract_audio(&self, input: &Path, range: Option<(f64, f64)>, output: &Path) -> CutterResult<()> {
        let mut command = FfmpegCommand::new(input, output);
        if let Some((start, duration)) = range {
            command = command.seek(start).duration(duration);
        }
        self.run(command.audio_only())
    }

    fn concat(&self, manifest: &Path, output: &Path) -> CutterResult<()> {
        self.run(FfmpegCommand::new(manifest, output).concat_demuxer().stream_copy())
    }
}

/// 写入 concat 分离器的清单文件
///
/// 清单与片段放在同一目录，只写文件名；文件名中的单引号按 `'\''` 转义。
pub fn write_concat_manifest(manifest: &Path, files: &[PathBuf]) -> CutterResult<()> {
    let mut content = String::new();
    for file in files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.to_string_lossy().into_owned());
        content.push_str(&format!("file '{}'\n", name.replace('\'', "'\\''")));
    }
    std::fs::write(manifest, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_cut_command_args() {
        let cmd = FfmpegCommand::new("in put.mp4", "out.mp4")
            .seek(5.0)
            .duration(2.5)
            .video_codec("libx264")
            .audio_codec("aac");
        assert_eq!(
            as_strings(cmd.build_args()),
            vec![
                "-y", "-v", "error", "-ss", "5.000", "-t", "2.500", "-i", "in put.mp4", "-c:v", "libx264", "-c:a",
                "aac", "out.mp4"
            ]
        );
    }

    #[test]
    fn test_concat_command_args() {
        let cmd = FfmpegCommand::new("concat_list.txt", "all.mp4").concat_demuxer().stream_copy();
        let args = as_strings(cmd.build_args());
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(&args[i - 4..i], ["-f", "concat", "-safe", "0"]);
        assert_eq!(&args[i + 2..], ["-c", "copy", "all.mp4"]);
    }

    #[test]
    fn test_audio_only_args() {
        let args = as_strings(FfmpegCommand::new("a.mp4", "a.mp3").audio_only().build_args());
        assert_eq!(&args[args.len() - 4..], ["-vn", "-q:a", "0", "a.mp3"]);
    }

    #[test]
    fn test_missing_binary_is_tool_failure() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = FfmpegTranscoder::new("definitely-not-an-ffmpeg-binary");
        let err = transcoder
            .cut_video(Path::new("in.mp4"), 0.0, 1.0, &dir.path().join("out.mp4"))
            .unwrap_err();
        assert_eq!(err.kind(), "external_tool_failure");
    }

    #[test]
    fn test_manifest_escapes_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("concat_list.txt");
        let files = vec![dir.path().join("temp_concat_1.mp4"), dir.path().join("it's.mp4")];
        write_concat_manifest(&manifest, &files).unwrap();
        let content = std::fs::read_to_string(&manifest).unwrap();
        assert_eq!(content, "file 'temp_concat_1.mp4'\nfile 'it'\\''s.mp4'\n");
    }
}
