#![allow(dead_code)]

use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use video_cutter::planner::thumbnail_public_path;
use video_cutter::task_queue::TaskFn;
use video_cutter::{
    AnalysisContext, ChangeDetection, ChangePointDetector, CutterError, CutterResult, DetectionConfig, Frame,
    FrameSource, JobExecutor, MediaProbe, TaskId, TaskProgress, TaskQueue, ThumbnailExtractor, Transcoder,
    Transcriber, VideoDownloader, VideoInfo,
};

/// 纯色帧组成的时间线，`cuts` 为 (帧号, 新颜色)
pub struct SyntheticVideo {
    pub fps: f64,
    pub frames: usize,
    pub cuts: Vec<(usize, [u8; 3])>,
}

impl SyntheticVideo {
    /// 30 秒、10 fps，5.0s 与 5.4s 各有一次切换
    pub fn thirty_seconds() -> Self {
        Self {
            fps: 10.0,
            frames: 300,
            cuts: vec![(50, [230, 230, 230]), (54, [20, 200, 20])],
        }
    }

    pub fn duration(&self) -> f64 {
        self.frames as f64 / self.fps
    }

    pub fn source(&self) -> SyntheticSource<'_> {
        SyntheticSource {
            video: self,
            cursor: 0,
            color: [20, 20, 20],
        }
    }
}

pub struct SyntheticSource<'a> {
    video: &'a SyntheticVideo,
    cursor: usize,
    color: [u8; 3],
}

impl FrameSource for SyntheticSource<'_> {
    fn fps(&self) -> f64 {
        self.video.fps
    }

    fn next_frame(&mut self) -> Option<Frame> {
        if self.cursor >= self.video.frames {
            return None;
        }
        if let Some((_, color)) = self.video.cuts.iter().find(|(at, _)| *at == self.cursor) {
            self.color = *color;
        }
        let frame = Frame::new(self.cursor as u64, RgbImage::from_pixel(64, 48, Rgb(self.color)));
        self.cursor += 1;
        Some(frame)
    }
}

/// 对合成视频运行真实的检测器
pub struct SyntheticDetection(pub SyntheticVideo);

impl ChangeDetection for SyntheticDetection {
    fn detect(&self, _video: &Path, config: &DetectionConfig) -> Vec<f64> {
        ChangePointDetector::new(config.clone(), None).detect(&mut self.0.source())
    }
}

pub struct FixedProbe {
    pub duration: f64,
    pub has_audio: bool,
}

impl MediaProbe for FixedProbe {
    fn probe(&self, path: &Path) -> CutterResult<VideoInfo> {
        if !path.exists() {
            return Err(CutterError::input_not_found(path));
        }
        Ok(VideoInfo {
            duration: self.duration,
            fps: 10.0,
            width: 64,
            height: 48,
            has_audio: self.has_audio,
        })
    }
}

/// 把封面写成空文件
pub struct FileThumbnails {
    pub dir: PathBuf,
}

impl ThumbnailExtractor for FileThumbnails {
    fn extract(&self, _video: &Path, at: f64) -> Option<PathBuf> {
        std::fs::create_dir_all(&self.dir).ok()?;
        let file_name = format!("thumb_{}.jpg", at as i64);
        std::fs::write(self.dir.join(&file_name), b"jpg").ok()?;
        Some(thumbnail_public_path(&file_name))
    }
}

#[derive(Default)]
pub struct FakeTranscoder {
    pub fail_cut_at: Option<f64>,
    pub fail_concat: bool,
}

impl Transcoder for FakeTranscoder {
    fn cut_video(&self, _input: &Path, start: f64, _duration: f64, output: &Path) -> CutterResult<()> {
        if self.fail_cut_at == Some(start) {
            return Err(CutterError::tool_failed("ffmpeg", "forced failure", None, Some(1)));
        }
        std::fs::write(output, b"video")?;
        Ok(())
    }

    fn extract_audio(&self, _input: &Path, _range: Option<(f64, f64)>, output: &Path) -> CutterResult<()> {
        std::fs::write(output, b"audio")?;
        Ok(())
    }

    fn concat(&self, _manifest: &Path, output: &Path) -> CutterResult<()> {
        if self.fail_concat {
            return Err(CutterError::tool_failed("ffmpeg", "forced failure", None, Some(1)));
        }
        std::fs::write(output, b"combined")?;
        Ok(())
    }
}

pub struct EchoTranscriber;

impl Transcriber for EchoTranscriber {
    fn transcribe(&self, audio: &Path) -> CutterResult<String> {
        Ok(format!("transcript of {}", audio.display()))
    }
}

/// 转写总是失败
pub struct FailingTranscriber;

impl Transcriber for FailingTranscriber {
    fn transcribe(&self, _audio: &Path) -> CutterResult<String> {
        Err(CutterError::tool_failed("whisper", "没有生成转写文件", None, Some(1)))
    }
}

/// 把固定内容写到下载目录
pub struct FakeDownloader;

impl VideoDownloader for FakeDownloader {
    fn download(&self, _url: &str, dest_dir: &Path) -> CutterResult<PathBuf> {
        std::fs::create_dir_all(dest_dir)?;
        let path = dest_dir.join("downloaded.mp4");
        std::fs::write(&path, b"video")?;
        Ok(path)
    }
}

/// 记录提交次数的队列包装
pub struct CountingQueue<Q> {
    pub inner: Q,
    pub submitted: AtomicUsize,
}

impl<Q: TaskQueue> TaskQueue for CountingQueue<Q> {
    fn submit(&self, name: &str, task: TaskFn) -> TaskId {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.inner.submit(name, task)
    }

    fn poll(&self, id: TaskId) -> Option<TaskProgress> {
        self.inner.poll(id)
    }
}

pub fn analysis_context(video: SyntheticVideo, thumbnail_dir: &Path) -> AnalysisContext {
    AnalysisContext {
        probe: Arc::new(FixedProbe {
            duration: video.duration(),
            has_audio: true,
        }),
        detection: Arc::new(SyntheticDetection(video)),
        thumbnails: Arc::new(FileThumbnails {
            dir: thumbnail_dir.to_path_buf(),
        }),
    }
}

pub fn executor(transcoder: FakeTranscoder) -> JobExecutor {
    executor_with(transcoder, Arc::new(EchoTranscriber))
}

pub fn executor_with(transcoder: FakeTranscoder, transcriber: Arc<dyn Transcriber>) -> JobExecutor {
    JobExecutor::new(
        Arc::new(transcoder),
        transcriber,
        Arc::new(FixedProbe {
            duration: 30.0,
            has_audio: true,
        }),
    )
}

pub fn write_video(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"source").unwrap();
    path
}
