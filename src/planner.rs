use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::metadata::Segment;
use crate::video_processor::VideoProcessor;

/// 封面目录对外挂载的路由前缀（`/thumbnails/<file>`）
pub const THUMBNAIL_ROUTE: &str = "thumbnails";

/// 封面文件对外的相对路径：`thumbnails/<file>`
pub fn thumbnail_public_path(file_name: &str) -> PathBuf {
    Path::new(THUMBNAIL_ROUTE).join(file_name)
}

/// 截取片段封面图的能力
pub trait ThumbnailExtractor: Send + Sync {
    /// 在 `at` 秒处截图，返回相对 [`THUMBNAIL_ROUTE`] 的路径；失败返回 `None`（不影响片段本身）
    fn extract(&self, video: &Path, at: f64) -> Option<PathBuf>;
}

/// 用 libav 截帧并保存为 JPEG
#[derive(Debug, Clone)]
pub struct FfmpegThumbnailer {
    output_dir: PathBuf,
}

impl FfmpegThumbnailer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

/// 封面文件名：`thumb_{视频名（空格换成下划线）}_{整数秒}.jpg`
pub fn thumbnail_file_name(video: &Path, at: f64) -> String {
    let name = video
        .file_name()
        .map(|n| n.to_string_lossy().replace(' ', "_"))
        .unwrap_or_else(|| "video".to_string());
    format!("thumb_{}_{}.jpg", name, at as i64)
}

impl FfmpegThumbnailer {
    /// 写入封面目录，返回对外路径
    fn save(&self, image: &RgbImage, video: &Path, at: f64) -> Option<PathBuf> {
        if let Err(e) = std::fs::create_dir_all(&self.output_dir) {
            warn!("⚠️  [片段规划] 创建封面目录失败: {}", e);
            return None;
        }
        let file_name = thumbnail_file_name(video, at);
        let path = self.output_dir.join(&file_name);
        match image.save(&path) {
            Ok(()) => Some(thumbnail_public_path(&file_name)),
            Err(e) => {
                warn!("⚠️  [片段规划] 保存封面失败 {}: {}", path.display(), e);
                None
            }
        }
    }
}

impl ThumbnailExtractor for FfmpegThumbnailer {
    fn extract(&self, video: &Path, at: f64) -> Option<PathBuf> {
        let image = VideoProcessor::new(video).ok()?.grab_frame_at(at)?;
        self.save(&image, video, at)
    }
}

/// 不截图的实现
#[derive(Debug, Default, Clone, Copy)]
pub struct NoThumbnails;

impl ThumbnailExtractor for NoThumbnails {
    fn extract(&self, _video: &Path, _at: f64) -> Option<PathBuf> {
        None
    }
}

/// 片段边界：`{0} ∪ 切换点 ∪ {duration}`，升序去重，越界的点丢弃
pub fn boundaries(duration: f64, change_points: &[f64]) -> Vec<f64> {
    let mut points: Vec<f64> = std::iter::once(0.0)
        .chain(
            change_points
                .iter()
                .copied()
                .filter(|t| t.is_finite() && *t > 0.0 && *t < duration),
        )
        .chain(std::iter::once(duration.max(0.0)))
        .collect();
    points.sort_by(f64::total_cmp);
    points.dedup();
    points
}

/// 将视频划分为连续片段，并为每个片段截取起始封面
pub fn plan(
    duration: f64,
    change_points: &[f64],
    video: &Path,
    thumbnails: &dyn ThumbnailExtractor,
) -> Vec<Segment> {
    plan_with_progress(duration, change_points, video, thumbnails, |_, _| {})
}

/// 同 [`plan`]，每截一张封面回调一次 `(当前序号, 总数)`
pub fn plan_with_progress(
    duration: f64,
    change_points: &[f64],
    video: &Path,
    thumbnails: &dyn ThumbnailExtractor,
    mut on_thumbnail: impl FnMut(usize, usize),
) -> Vec<Segment> {
    let bounds = boundaries(duration, change_points);
    let ranges: Vec<(f64, f64)> = bounds
        .windows(2)
        .map(|w| (w[0], w[1]))
        .filter(|(a, b)| b > a)
        .collect();
    let total = ranges.len();

    ranges
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| {
            on_thumbnail(index + 1, total);
            let thumbnail = thumbnails.extract(video, start);
            if thumbnail.is_none() {
                debug!("[片段规划] 片段 {} 没有封面", index + 1);
            }
            Segment {
                index,
                start,
                end,
                thumbnail,
            }
        })
        .collect()
}
