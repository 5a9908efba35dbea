//! 剪辑任务执行器
//!
//! 两种模式：
//! - 独立模式：每个任务单独输出视频 / 音频 / 文字，任务之间互不影响
//! - 拼接模式：先切出临时片段，再按顺序拼接成一个合并视频，最后按需提取音频和转写
//!
//! 任务严格按提交顺序串行执行，临时文件按任务编号命名。

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{CutterError, CutterResult};
use crate::job::{
    ArtifactCollections, ArtifactKind, JobFailure, JobSpec, OutputArtifact, OutputFormat, PipelineResult,
    PipelineStatus,
};
use crate::transcoder::{write_concat_manifest, Transcoder};
use crate::transcriber::Transcriber;
use crate::video_processor::MediaProbe;

/// 拼接清单文件名
pub const CONCAT_MANIFEST: &str = "concat_list.txt";

/// 作用域结束时删除登记过的文件和目录
///
/// 无论流程正常结束还是中途返回错误都会执行。
#[derive(Debug, Default)]
pub(crate) struct CleanupGuard {
    paths: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl CleanupGuard {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn track(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    /// 登记整个目录（连同其中内容）
    pub(crate) fn track_dir(&mut self, dir: impl Into<PathBuf>) {
        self.dirs.push(dir.into());
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        for path in &self.paths {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("⚠️  [任务执行] 删除临时文件失败 {}: {}", path.display(), e);
                }
            }
        }
        for dir in &self.dirs {
            if dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(dir) {
                    warn!("⚠️  [任务执行] 删除临时目录失败 {}: {}", dir.display(), e);
                }
            }
        }
    }
}

/// 每次执行独占的临时目录，并发任务共用输出目录时临时文件互不干扰
fn create_work_dir(output_dir: &Path) -> CutterResult<PathBuf> {
    let dir = output_dir.join(format!(".work-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// 剪辑执行器，外部工具通过 trait 注入
#[derive(Clone)]
pub struct JobExecutor {
    transcoder: Arc<dyn Transcoder>,
    transcriber: Arc<dyn Transcriber>,
    probe: Arc<dyn MediaProbe>,
}

impl JobExecutor {
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        transcriber: Arc<dyn Transcriber>,
        probe: Arc<dyn MediaProbe>,
    ) -> Self {
        Self {
            transcoder,
            transcriber,
            probe,
        }
    }

    /// 独立模式
    ///
    /// 单个任务失败只记录到 `failures`，不影响其他任务。
    /// 全部任务结束后删除原始视频。
    pub fn run(
        &self,
        video: &Path,
        jobs: &[JobSpec],
        output_dir: &Path,
        progress: &dyn Fn(&str),
    ) -> CutterResult<PipelineResult> {
        if !video.exists() {
            return Err(CutterError::input_not_found(video));
        }
        std::fs::create_dir_all(output_dir)?;
        let work_dir = create_work_dir(output_dir)?;
        let mut cleanup = CleanupGuard::new();
        cleanup.track_dir(&work_dir);
        let start = Instant::now();
        let base = base_name(video);
        let has_audio = match self.probe.probe(video) {
            Ok(info) => info.has_audio,
            Err(e) => {
                warn!("⚠️  [任务执行] 读取视频信息失败，按无音轨处理: {}", e);
                false
            }
        };

        let mut artifacts = ArtifactCollections::default();
        let mut failures = Vec::new();
        let total = jobs.len();

        for (i, job) in jobs.iter().enumerate() {
            progress(&format!("正在处理片段 {}/{}...", i + 1, total));
            let mut produced = Vec::new();
            let dirs = JobDirs {
                output: output_dir,
                work: &work_dir,
            };
            let result = self.run_job(i, job, video, &base, has_audio, dirs, &mut produced, &mut failures);
            for artifact in produced {
                artifacts.push(artifact);
            }
            if let Err(e) = result {
                error!("❌ [任务执行] 片段 {} 处理失败: {}", i + 1, e);
                failures.push(JobFailure::from_error(i, &e));
            }
        }

        remove_input(video);
        info!(
            "✅ [任务执行] 独立模式完成: {} 个产物, {} 个失败，耗时: {:.2}秒",
            artifacts.len(),
            failures.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(PipelineResult {
            status: PipelineStatus::Complete,
            message: "任务完成".to_string(),
            artifacts,
            failures,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn run_job(
        &self,
        index: usize,
        job: &JobSpec,
        video: &Path,
        base: &str,
        has_audio: bool,
        dirs: JobDirs<'_>,
        produced: &mut Vec<OutputArtifact>,
        failures: &mut Vec<JobFailure>,
    ) -> CutterResult<()> {
        let name = format!("{}_segment_at_{}s", base, job.start as i64);
        let video_path = dirs.output.join(format!("{}.{}", name, OutputFormat::Video.extension()));
        let audio_path = dirs.output.join(format!("{}.{}", name, OutputFormat::Audio.extension()));
        let text_path = dirs.output.join(format!("{}.{}", name, OutputFormat::Text.extension()));
        let duration = job.duration();

        let mut cut_produced = false;
        if job.wants(OutputFormat::Video) {
            // 视频切片失败时，音频改为直接从原视频提取
            match self.transcoder.cut_video(video, job.start, duration, &video_path) {
                Ok(()) if video_path.exists() => {
                    cut_produced = true;
                    produced.push(OutputArtifact {
                        kind: ArtifactKind::Video,
                        path: video_path.clone(),
                    });
                }
                Ok(()) => {
                    let e = CutterError::tool_failed(
                        "ffmpeg",
                        format!("输出文件不存在: {}", video_path.display()),
                        None,
                        None,
                    );
                    error!("❌ [任务执行] 片段 {} 视频切片失败: {}", index + 1, e);
                    failures.push(JobFailure::from_error(index, &e));
                }
                Err(e) => {
                    error!("❌ [任务执行] 片段 {} 视频切片失败: {}", index + 1, e);
                    failures.push(JobFailure::from_error(index, &e));
                }
            }
        }

        if !job.needs_audio() {
            return Ok(());
        }
        if !has_audio {
            info!("ℹ️  [任务执行] 视频没有音轨，跳过片段 {} 的音频和文字", index + 1);
            return Ok(());
        }

        let mut cleanup = CleanupGuard::new();
        let audio_source = if cut_produced {
            video_path.clone()
        } else {
            let temp = dirs.work.join(format!("temp_audio_{}.mp3", index + 1));
            cleanup.track(temp.clone());
            self.transcoder.extract_audio(video, Some((job.start, duration)), &temp)?;
            temp
        };

        if job.wants(OutputFormat::Audio) {
            if cut_produced {
                self.transcoder.extract_audio(&audio_source, None, &audio_path)?;
            } else {
                std::fs::rename(&audio_source, &audio_path)?;
            }
            produced.push(OutputArtifact {
                kind: ArtifactKind::Audio,
                path: audio_path.clone(),
            });
        }

        if job.wants(OutputFormat::Text) {
            let text_source = if job.wants(OutputFormat::Audio) && audio_path.exists() {
                &audio_path
            } else {
                &audio_source
            };
            let text = self.transcriber.transcribe(text_source)?;
            std::fs::write(&text_path, text)?;
            produced.push(OutputArtifact {
                kind: ArtifactKind::Text,
                path: text_path,
            });
        }
        Ok(())
    }

    /// 拼接模式
    ///
    /// 临时片段、清单文件、原始视频在返回前一定会被删除（包括出错返回）。
    /// 没有任何临时片段生成时返回 `NoSegments` 状态，而不是错误。
    pub fn run_concatenated(
        &self,
        video: &Path,
        jobs: &[JobSpec],
        output_dir: &Path,
        progress: &dyn Fn(&str),
    ) -> CutterResult<PipelineResult> {
        if !video.exists() {
            return Err(CutterError::input_not_found(video));
        }
        std::fs::create_dir_all(output_dir)?;
        let start = Instant::now();
        let base = base_name(video);

        let work_dir = create_work_dir(output_dir)?;
        let mut cleanup = CleanupGuard::new();
        cleanup.track(video);
        cleanup.track_dir(&work_dir);

        // 阶段 1：切出临时片段
        progress("正在生成临时片段...");
        let mut temps = Vec::new();
        let mut failures = Vec::new();
        let total = jobs.len();
        for (i, job) in jobs.iter().enumerate() {
            progress(&format!("正在生成临时片段 {}/{}...", i + 1, total));
            let temp = work_dir.join(format!("temp_concat_{}.mp4", i + 1));
            match self.transcoder.cut_video(video, job.start, job.duration(), &temp) {
                Ok(()) if temp.exists() => temps.push(temp),
                Ok(()) => warn!("⚠️  [任务执行] 临时片段 {} 未生成", i + 1),
                Err(e) => {
                    error!("❌ [任务执行] 临时片段 {} 生成失败: {}", i + 1, e);
                    failures.push(JobFailure::from_error(i, &e));
                }
            }
        }

        if temps.is_empty() {
            warn!("⚠️  [任务执行] 没有生成任何临时片段");
            return Ok(PipelineResult {
                status: PipelineStatus::NoSegments,
                message: "任务失败：没有生成任何临时片段".to_string(),
                artifacts: ArtifactCollections::default(),
                failures,
            });
        }

        // 阶段 2：按任务顺序拼接
        let manifest = work_dir.join(CONCAT_MANIFEST);
        write_concat_manifest(&manifest, &temps)?;

        let formats: BTreeSet<OutputFormat> = jobs.iter().flat_map(|j| j.formats.iter().copied()).collect();
        let wants_video = formats.contains(&OutputFormat::Video);
        let wants_audio = formats.contains(&OutputFormat::Audio);
        let wants_text = formats.contains(&OutputFormat::Text);

        let combined_video = output_dir.join(format!("{}_combined.mp4", base));
        if !wants_video {
            cleanup.track(combined_video.clone());
        }
        progress("正在拼接片段...");
        self.transcoder.concat(&manifest, &combined_video)?;

        let mut artifacts = ArtifactCollections::default();
        if wants_video {
            artifacts.push(OutputArtifact {
                kind: ArtifactKind::Video,
                path: combined_video.clone(),
            });
        }

        // 阶段 3：按所有任务请求格式的并集提取音频、转写
        if wants_audio || wants_text {
            let combined_audio = output_dir.join(format!("{}_combined.mp3", base));
            if !wants_audio {
                cleanup.track(combined_audio.clone());
            }
            progress("正在提取合并音频...");
            self.transcoder.extract_audio(&combined_video, None, &combined_audio)?;
            if wants_audio {
                artifacts.push(OutputArtifact {
                    kind: ArtifactKind::Audio,
                    path: combined_audio.clone(),
                });
            }

            if wants_text {
                progress("正在转写合并音频...");
                let text = self.transcriber.transcribe(&combined_audio)?;
                let combined_text = output_dir.join(format!("{}_combined.txt", base));
                std::fs::write(&combined_text, text)?;
                artifacts.push(OutputArtifact {
                    kind: ArtifactKind::Text,
                    path: combined_text,
                });
            }
        }

        progress("正在清理临时文件...");
        info!(
            "✅ [任务执行] 拼接模式完成: {} 个片段, {} 个产物，耗时: {:.2}秒",
            temps.len(),
            artifacts.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(PipelineResult {
            status: PipelineStatus::Complete,
            message: "任务完成".to_string(),
            artifacts,
            failures,
        })
    }
}

/// 单个任务的输出目录与本次执行的临时目录
#[derive(Clone, Copy)]
struct JobDirs<'a> {
    output: &'a Path,
    work: &'a Path,
}

/// 不含扩展名的文件名
fn base_name(video: &Path) -> String {
    video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string())
}

fn remove_input(video: &Path) {
    match std::fs::remove_file(video) {
        Ok(()) => info!("🗑️  [任务执行] 已删除原始视频: {}", video.display()),
        Err(e) => warn!("⚠️  [任务执行] 删除原始视频失败 {}: {}", video.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video_processor::VideoInfo;
    use std::sync::Mutex;

    /// 写小文件代替真正转码的假实现
    ///
    /// 切片内容为 `{输入文件名}@{开始时间}`，拼接结果按清单顺序连接各片段内容。
    #[derive(Default)]
    struct FakeTranscoder {
        fail_cut_at: Option<f64>,
        fail_concat: bool,
        calls: Mutex<Vec<String>>,
    }

    impl Transcoder for FakeTranscoder {
        fn cut_video(&self, input: &Path, start: f64, _duration: f64, output: &Path) -> CutterResult<()> {
            self.calls.lock().unwrap().push(format!("cut {}", start));
            if self.fail_cut_at == Some(start) {
                return Err(CutterError::tool_failed("ffmpeg", "forced", Some("boom".into()), Some(1)));
            }
            let name = input.file_name().unwrap().to_string_lossy().into_owned();
            std::fs::write(output, format!("{}@{};", name, start))?;
            Ok(())
        }

        fn extract_audio(&self, _input: &Path, range: Option<(f64, f64)>, output: &Path) -> CutterResult<()> {
            self.calls.lock().unwrap().push(format!("audio {:?}", range));
            std::fs::write(output, b"audio")?;
            Ok(())
        }

        fn concat(&self, manifest: &Path, output: &Path) -> CutterResult<()> {
            self.calls.lock().unwrap().push("concat".to_string());
            if self.fail_concat {
                return Err(CutterError::tool_failed("ffmpeg", "forced", None, Some(1)));
            }
            let dir = manifest.parent().unwrap();
            let mut combined = String::new();
            for line in std::fs::read_to_string(manifest)?.lines() {
                let name = line.trim_start_matches("file '").trim_end_matches('\'');
                combined.push_str(&std::fs::read_to_string(dir.join(name))?);
            }
            std::fs::write(output, combined)?;
            Ok(())
        }
    }

    struct FakeTranscriber;

    impl Transcriber for FakeTranscriber {
        fn transcribe(&self, audio: &Path) -> CutterResult<String> {
            Ok(format!("text of {}", audio.file_name().unwrap().to_string_lossy()))
        }
    }

    struct FailingTranscriber;

    impl Transcriber for FailingTranscriber {
        fn transcribe(&self, _audio: &Path) -> CutterResult<String> {
            Err(CutterError::tool_failed("whisper", "没有生成转写文件", None, Some(1)))
        }
    }

    struct FakeProbe {
        has_audio: bool,
    }

    impl MediaProbe for FakeProbe {
        fn probe(&self, _path: &Path) -> CutterResult<VideoInfo> {
            Ok(VideoInfo {
                duration: 30.0,
                fps: 30.0,
                width: 320,
                height: 240,
                has_audio: self.has_audio,
            })
        }
    }

    fn quiet(_: &str) {}

    fn executor(transcoder: Arc<FakeTranscoder>, has_audio: bool) -> JobExecutor {
        JobExecutor::new(transcoder, Arc::new(FakeTranscriber), Arc::new(FakeProbe { has_audio }))
    }

    fn failing_transcription_executor() -> JobExecutor {
        JobExecutor::new(
            Arc::new(FakeTranscoder::default()),
            Arc::new(FailingTranscriber),
            Arc::new(FakeProbe { has_audio: true }),
        )
    }

    fn source(dir: &Path) -> PathBuf {
        source_named(dir, "clip.mp4")
    }

    fn source_named(dir: &Path, name: &str) -> PathBuf {
        let video = dir.join(name);
        std::fs::write(&video, b"source").unwrap();
        video
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_failed_job_does_not_abort_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let video = source(dir.path());
        let out = dir.path().join("results");
        let transcoder = Arc::new(FakeTranscoder {
            fail_cut_at: Some(10.0),
            ..Default::default()
        });
        let jobs = vec![
            JobSpec::new(0.0, 10.0, [OutputFormat::Video]),
            JobSpec::new(10.0, 20.0, [OutputFormat::Video]),
            JobSpec::new(20.0, 30.0, [OutputFormat::Video]),
        ];

        let result = executor(transcoder, true).run(&video, &jobs, &out, &quiet).unwrap();

        assert_eq!(
            result.artifacts.video,
            vec![out.join("clip_segment_at_0s.mp4"), out.join("clip_segment_at_20s.mp4")]
        );
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].job_index, 1);
        assert_eq!(result.failures[0].kind, "external_tool_failure");
        assert!(!video.exists());
    }

    #[test]
    fn test_audio_only_job_moves_temp_audio() {
        let dir = tempfile::tempdir().unwrap();
        let video = source(dir.path());
        let out = dir.path().join("results");
        let transcoder = Arc::new(FakeTranscoder::default());
        let jobs = vec![JobSpec::new(5.0, 9.0, [OutputFormat::Audio, OutputFormat::Text])];

        let result = executor(transcoder.clone(), true).run(&video, &jobs, &out, &quiet).unwrap();

        assert_eq!(result.artifacts.audio, vec![out.join("clip_segment_at_5s.mp3")]);
        assert_eq!(result.artifacts.text, vec![out.join("clip_segment_at_5s.txt")]);
        let text = std::fs::read_to_string(out.join("clip_segment_at_5s.txt")).unwrap();
        assert_eq!(text, "text of clip_segment_at_5s.mp3");
        assert_eq!(file_names(&out), vec!["clip_segment_at_5s.mp3", "clip_segment_at_5s.txt"]);
        assert_eq!(*transcoder.calls.lock().unwrap(), vec!["audio Some((5.0, 4.0))"]);
    }

    #[test]
    fn test_text_only_job_removes_temp_audio() {
        let dir = tempfile::tempdir().unwrap();
        let video = source(dir.path());
        let out = dir.path().join("results");
        let jobs = vec![JobSpec::new(0.0, 4.0, [OutputFormat::Text])];

        let result = executor(Arc::new(FakeTranscoder::default()), true)
            .run(&video, &jobs, &out, &quiet)
            .unwrap();

        assert!(result.artifacts.audio.is_empty());
        assert_eq!(result.artifacts.text.len(), 1);
        assert_eq!(file_names(&out), vec!["clip_segment_at_0s.txt"]);
    }

    #[test]
    fn test_video_and_audio_reuse_cut() {
        let dir = tempfile::tempdir().unwrap();
        let video = source(dir.path());
        let out = dir.path().join("results");
        let transcoder = Arc::new(FakeTranscoder::default());
        let jobs = vec![JobSpec::new(3.0, 8.0, [OutputFormat::Video, OutputFormat::Audio])];

        let result = executor(transcoder.clone(), true).run(&video, &jobs, &out, &quiet).unwrap();

        assert_eq!(result.artifacts.len(), 2);
        // 音频从切好的视频里提取，不再读原视频
        assert_eq!(*transcoder.calls.lock().unwrap(), vec!["cut 3", "audio None"]);
    }

    #[test]
    fn test_no_audio_track_skips_audio_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let video = source(dir.path());
        let out = dir.path().join("results");
        let jobs = vec![JobSpec::new(0.0, 4.0, [OutputFormat::Video, OutputFormat::Audio])];

        let result = executor(Arc::new(FakeTranscoder::default()), false)
            .run(&video, &jobs, &out, &quiet)
            .unwrap();

        assert_eq!(result.artifacts.video.len(), 1);
        assert!(result.artifacts.audio.is_empty());
        assert!(result.failures.is_empty());
    }

    #[test]
    fn test_missing_input_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = executor(Arc::new(FakeTranscoder::default()), true)
            .run(&dir.path().join("gone.mp4"), &[], dir.path(), &quiet)
            .unwrap_err();
        assert!(matches!(err, CutterError::InputNotFound(_)));
    }

    #[test]
    fn test_concatenated_outputs_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let video = source(dir.path());
        let out = dir.path().join("results");
        let jobs = vec![
            JobSpec::new(0.0, 5.0, [OutputFormat::Video]),
            JobSpec::new(10.0, 15.0, [OutputFormat::Text]),
        ];
        let messages = Mutex::new(Vec::new());

        let result = executor(Arc::new(FakeTranscoder::default()), true)
            .run_concatenated(&video, &jobs, &out, &|m: &str| messages.lock().unwrap().push(m.to_string()))
            .unwrap();

        assert_eq!(result.status, PipelineStatus::Complete);
        assert_eq!(result.artifacts.video, vec![out.join("clip_combined.mp4")]);
        assert!(result.artifacts.audio.is_empty());
        assert_eq!(result.artifacts.text, vec![out.join("clip_combined.txt")]);
        // 只剩最终产物，中间的合并音频也被清理
        assert_eq!(file_names(&out), vec!["clip_combined.mp4", "clip_combined.txt"]);
        assert!(!video.exists());
        assert!(messages.lock().unwrap().iter().any(|m| m.contains("拼接")));
    }

    #[test]
    fn test_concat_failure_still_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let video = source(dir.path());
        let out = dir.path().join("results");
        let transcoder = Arc::new(FakeTranscoder {
            fail_concat: true,
            ..Default::default()
        });
        let jobs = vec![
            JobSpec::new(0.0, 5.0, [OutputFormat::Video]),
            JobSpec::new(5.0, 10.0, [OutputFormat::Video]),
        ];

        let err = executor(transcoder, true)
            .run_concatenated(&video, &jobs, &out, &quiet)
            .unwrap_err();

        assert_eq!(err.kind(), "external_tool_failure");
        assert!(file_names(&out).is_empty());
        assert!(!video.exists());
    }

    #[test]
    fn test_concat_with_no_segments_is_soft_failure() {
        let dir = tempfile::tempdir().unwrap();
        let video = source(dir.path());
        let out = dir.path().join("results");
        let transcoder = Arc::new(FakeTranscoder {
            fail_cut_at: Some(0.0),
            ..Default::default()
        });
        let jobs = vec![JobSpec::new(0.0, 5.0, [OutputFormat::Video])];

        let result = executor(transcoder, true)
            .run_concatenated(&video, &jobs, &out, &quiet)
            .unwrap();

        assert_eq!(result.status, PipelineStatus::NoSegments);
        assert!(result.artifacts.is_empty());
        assert_eq!(result.failures.len(), 1);
    }

    #[test]
    fn test_manifest_keeps_job_order() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join(CONCAT_MANIFEST);
        let temps: Vec<PathBuf> = (1..=3).map(|i| dir.path().join(format!("temp_concat_{}.mp4", i))).collect();
        write_concat_manifest(&manifest, &temps).unwrap();
        let content = std::fs::read_to_string(&manifest).unwrap();
        assert_eq!(
            content.lines().collect::<Vec<_>>(),
            vec!["file 'temp_concat_1.mp4'", "file 'temp_concat_2.mp4'", "file 'temp_concat_3.mp4'"]
        );
    }

    #[test]
    fn test_cut_without_output_is_recorded() {
        /// 声称成功但不写文件
        struct SilentTranscoder;

        impl Transcoder for SilentTranscoder {
            fn cut_video(&self, _input: &Path, _start: f64, _duration: f64, _output: &Path) -> CutterResult<()> {
                Ok(())
            }

            fn extract_audio(&self, _input: &Path, _range: Option<(f64, f64)>, output: &Path) -> CutterResult<()> {
                std::fs::write(output, b"audio")?;
                Ok(())
            }

            fn concat(&self, _manifest: &Path, _output: &Path) -> CutterResult<()> {
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let video = source(dir.path());
        let out = dir.path().join("results");
        let executor = JobExecutor::new(
            Arc::new(SilentTranscoder),
            Arc::new(FakeTranscriber),
            Arc::new(FakeProbe { has_audio: true }),
        );
        let jobs = vec![JobSpec::new(0.0, 4.0, [OutputFormat::Video, OutputFormat::Audio])];

        let result = executor.run(&video, &jobs, &out, &quiet).unwrap();

        assert!(result.artifacts.video.is_empty());
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].kind, "external_tool_failure");
        // 音频改从原视频提取
        assert_eq!(result.artifacts.audio, vec![out.join("clip_segment_at_0s.mp3")]);
    }

    #[test]
    fn test_transcription_failure_keeps_audio_and_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let video = source(dir.path());
        let out = dir.path().join("results");
        let jobs = vec![
            JobSpec::new(0.0, 5.0, [OutputFormat::Audio, OutputFormat::Text]),
            JobSpec::new(5.0, 10.0, [OutputFormat::Video]),
        ];

        let result = failing_transcription_executor().run(&video, &jobs, &out, &quiet).unwrap();

        assert_eq!(result.artifacts.audio, vec![out.join("clip_segment_at_0s.mp3")]);
        assert!(result.artifacts.text.is_empty());
        assert_eq!(result.artifacts.video, vec![out.join("clip_segment_at_5s.mp4")]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].job_index, 0);
        assert_eq!(result.failures[0].kind, "external_tool_failure");
        assert_eq!(file_names(&out), vec!["clip_segment_at_0s.mp3", "clip_segment_at_5s.mp4"]);
        assert!(!video.exists());
    }

    #[test]
    fn test_text_only_transcription_failure_removes_temp_audio() {
        let dir = tempfile::tempdir().unwrap();
        let video = source(dir.path());
        let out = dir.path().join("results");
        let jobs = vec![JobSpec::new(0.0, 5.0, [OutputFormat::Text])];

        let result = failing_transcription_executor().run(&video, &jobs, &out, &quiet).unwrap();

        assert!(result.artifacts.is_empty());
        assert_eq!(result.failures.len(), 1);
        assert!(file_names(&out).is_empty());
    }

    #[test]
    fn test_concat_transcription_failure_still_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let video = source(dir.path());
        let out = dir.path().join("results");
        let jobs = vec![
            JobSpec::new(0.0, 5.0, [OutputFormat::Audio]),
            JobSpec::new(5.0, 10.0, [OutputFormat::Text]),
        ];

        let err = failing_transcription_executor()
            .run_concatenated(&video, &jobs, &out, &quiet)
            .unwrap_err();

        assert_eq!(err.kind(), "external_tool_failure");
        // 临时片段、清单和未请求的合并视频都被清理，已生成的合并音频保留
        assert_eq!(file_names(&out), vec!["clip_combined.mp3"]);
        assert!(!video.exists());
    }

    #[test]
    fn test_parallel_concatenations_share_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("results");
        let first = source_named(dir.path(), "first.mp4");
        let second = source_named(dir.path(), "second.mp4");
        let executor = executor(Arc::new(FakeTranscoder::default()), true);
        let barrier = std::sync::Barrier::new(2);

        let run = |video: &Path, starts: [f64; 3]| {
            let jobs: Vec<JobSpec> = starts
                .iter()
                .map(|&s| JobSpec::new(s, s + 1.0, [OutputFormat::Video]))
                .collect();
            barrier.wait();
            executor.run_concatenated(video, &jobs, &out, &quiet).unwrap()
        };
        let (a, b) = std::thread::scope(|scope| {
            let a = scope.spawn(|| run(&first, [0.0, 1.0, 2.0]));
            let b = scope.spawn(|| run(&second, [7.0, 8.0, 9.0]));
            (a.join().unwrap(), b.join().unwrap())
        });

        assert_eq!(a.artifacts.video, vec![out.join("first_combined.mp4")]);
        assert_eq!(b.artifacts.video, vec![out.join("second_combined.mp4")]);
        assert_eq!(
            std::fs::read_to_string(out.join("first_combined.mp4")).unwrap(),
            "first.mp4@0;first.mp4@1;first.mp4@2;"
        );
        assert_eq!(
            std::fs::read_to_string(out.join("second_combined.mp4")).unwrap(),
            "second.mp4@7;second.mp4@8;second.mp4@9;"
        );
        assert_eq!(file_names(&out), vec!["first_combined.mp4", "second_combined.mp4"]);
    }
}
