pub mod error;
pub mod video_processor;
pub mod features;
pub mod frame_stats;
pub mod scene_detector;
pub mod metadata;
pub mod planner;
pub mod job;
pub mod transcoder;
pub mod transcriber;
pub mod downloader;
pub mod executor;
pub mod processor;
pub mod task_queue;
pub mod orchestrator;
pub mod upload;
pub mod handler;
pub mod config;

pub use error::{CutterError, CutterResult};
pub use video_processor::{FfmpegProbe, Frame, FrameSource, MediaProbe, VideoInfo, VideoProcessor};
pub use features::ReferenceMatcher;
pub use scene_detector::{ChangePointDetector, DetectionConfig, DetectionPolicy};
pub use metadata::{AnalysisResult, Segment};
pub use planner::{plan, FfmpegThumbnailer, ThumbnailExtractor};
pub use job::{JobSpec, OutputFormat, OverrideSplit, PipelineResult, PipelineStatus};
pub use transcoder::{FfmpegTranscoder, Transcoder};
pub use transcriber::{Transcriber, WhisperTranscriber};
pub use downloader::{VideoDownloader, YtDlpDownloader};
pub use executor::JobExecutor;
pub use processor::{analyze_video, AnalysisContext, ChangeDetection, FfmpegChangeDetection};
pub use task_queue::{LocalTaskQueue, TaskId, TaskProgress, TaskQueue, TaskState};
pub use orchestrator::{AnalysisRequest, Orchestrator, VideoSource};
pub use config::{AppConfig, ConfigLoader, ConfigOverrides};
