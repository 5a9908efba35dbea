use ffmpeg_next as ffmpeg;
use image::{GrayImage, RgbImage};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{CutterError, CutterResult};

/// 容器帧率缺失或为 0 时使用的默认帧率
pub const DEFAULT_FPS: f64 = 30.0;

/// 解码后的单帧
#[derive(Debug, Clone)]
pub struct Frame {
    /// 从 0 开始的解码顺序编号
    pub index: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image }
    }

    /// 灰度视图
    pub fn gray(&self) -> GrayImage {
        image::DynamicImage::ImageRgb8(self.image.clone()).to_luma8()
    }
}

/// 顺序帧读取器
///
/// 解码失败与读到结尾都返回 `None`。
pub trait FrameSource {
    fn fps(&self) -> f64;
    fn next_frame(&mut self) -> Option<Frame>;
}

/// 视频基础信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    /// 时长（秒）
    pub duration: f64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub has_audio: bool,
}

/// 读取视频信息的能力，执行器据此判断是否有音轨
pub trait MediaProbe: Send + Sync {
    fn probe(&self, path: &Path) -> CutterResult<VideoInfo>;
}

/// 视频处理器，负责用 libav 打开视频、顺序解码帧、按时间截帧
pub struct VideoProcessor {
    input_path: PathBuf,
}

impl VideoProcessor {
    pub fn new(input_path: impl AsRef<Path>) -> CutterResult<Self> {
        init_ffmpeg()?;
        let input_path = input_path.as_ref().to_path_buf();
        if !input_path.exists() {
            return Err(CutterError::input_not_found(&input_path));
        }
        Ok(Self { input_path })
    }

    /// 获取视频信息
    pub fn get_video_info(&self) -> CutterResult<VideoInfo> {
        let ictx = open_input(&self.input_path)?;

        let video_stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| CutterError::DecodeFailure("未找到视频流".to_string()))?;

        let decoder = ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| CutterError::DecodeFailure(format!("无法创建视频解码器: {}", e)))?;

        let fps = rational_fps(video_stream.avg_frame_rate());
        let duration = if ictx.duration() > 0 {
            ictx.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE)
        } else {
            0.0
        };
        let has_audio = ictx.streams().best(ffmpeg::media::Type::Audio).is_some();

        Ok(VideoInfo {
            duration,
            fps,
            width: decoder.width(),
            height: decoder.height(),
            has_audio,
        })
    }

    /// 打开顺序帧读取器
    ///
    /// `max_width` 用于分析时缩小帧，保持宽高比。
    pub fn open_frames(&self, max_width: Option<u32>) -> CutterResult<FfmpegFrameSource> {
        FfmpegFrameSource::open(&self.input_path, max_width)
    }

    /// 跳转到指定时间（毫秒精度）截取一帧，失败返回 `None`
    pub fn grab_frame_at(&self, seconds: f64) -> Option<RgbImage> {
        match grab_frame(&self.input_path, seconds) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("截帧失败 {} @ {:.3}s: {}", self.input_path.display(), seconds, e);
                None
            }
        }
    }
}

/// 基于 libav 的 `MediaProbe`
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegProbe;

impl MediaProbe for FfmpegProbe {
    fn probe(&self, path: &Path) -> CutterResult<VideoInfo> {
        VideoProcessor::new(path)?.get_video_info()
    }
}

/// 基于 libav 的顺序帧读取器
pub struct FfmpegFrameSource {
    ictx: ffmpeg::format::context::Input,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    fps: f64,
    next_index: u64,
    pending: VecDeque<Frame>,
    eof: bool,
}

impl FfmpegFrameSource {
    fn open(path: &Path, max_width: Option<u32>) -> CutterResult<Self> {
        let ictx = open_input(path)?;
        let stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| CutterError::DecodeFailure("未找到视频流".to_string()))?;
        let stream_index = stream.index();
        let fps = rational_fps(stream.avg_frame_rate());

        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| CutterError::DecodeFailure(format!("无法创建视频解码器: {}", e)))?;

        let (out_width, out_height) = scaled_size(decoder.width(), decoder.height(), max_width);
        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::RGB24,
            out_width,
            out_height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| CutterError::DecodeFailure(format!("无法创建缩放器: {}", e)))?;

        Ok(Self {
            ictx,
            decoder,
            scaler,
            stream_index,
            fps,
            next_index: 0,
            pending: VecDeque::new(),
            eof: false,
        })
    }

    /// 从解码器取出所有已就绪的帧
    fn drain_decoder(&mut self) {
        let mut decoded = ffmpeg::frame::Video::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let mut rgb_frame = ffmpeg::frame::Video::empty();
            if self.scaler.run(&decoded, &mut rgb_frame).is_err() {
                // 无法转换的帧仍占用一个编号，保证时间戳与帧序一致
                self.next_index += 1;
                continue;
            }
            let image = frame_to_image(&rgb_frame);
            self.pending.push_back(Frame::new(self.next_index, image));
            self.next_index += 1;
        }
    }
}

impl FrameSource for FfmpegFrameSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(frame);
            }
            if self.eof {
                return None;
            }

            let next = self.ictx.packets().next().map(|(stream, packet)| (stream.index(), packet));
            match next {
                Some((index, packet)) => {
                    if index != self.stream_index {
                        continue;
                    }
                    if self.decoder.send_packet(&packet).is_err() {
                        continue;
                    }
                    self.drain_decoder();
                }
                None => {
                    self.eof = true;
                    if self.decoder.send_eof().is_ok() {
                        self.drain_decoder();
                    }
                }
            }
        }
    }
}

fn init_ffmpeg() -> CutterResult<()> {
    ffmpeg::init().map_err(|e| CutterError::DecodeFailure(format!("初始化 FFmpeg 失败: {}", e)))?;
    // 只输出错误级别的 libav 日志
    ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
    Ok(())
}

fn open_input(path: &Path) -> CutterResult<ffmpeg::format::context::Input> {
    if !path.exists() {
        return Err(CutterError::input_not_found(path));
    }
    ffmpeg::format::input(&path)
        .map_err(|e| CutterError::DecodeFailure(format!("无法打开视频文件 {}: {}", path.display(), e)))
}

fn rational_fps(rate: ffmpeg::Rational) -> f64 {
    if rate.numerator() > 0 && rate.denominator() > 0 {
        f64::from(rate.numerator()) / f64::from(rate.denominator())
    } else {
        DEFAULT_FPS
    }
}

/// 按最大宽度等比缩放，尺寸取偶数
fn scaled_size(width: u32, height: u32, max_width: Option<u32>) -> (u32, u32) {
    match max_width {
        Some(max) if max > 0 && width > max && height > 0 => {
            let h = ((f64::from(height) * f64::from(max) / f64::from(width)).round() as u32).max(2);
            (max & !1, h & !1)
        }
        _ => (width, height),
    }
}

fn grab_frame(path: &Path, seconds: f64) -> CutterResult<Option<RgbImage>> {
    init_ffmpeg()?;
    let mut ictx = open_input(path)?;
    let (stream_index, time_base, parameters) = {
        let stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| CutterError::DecodeFailure("未找到视频流".to_string()))?;
        (stream.index(), stream.time_base(), stream.parameters())
    };

    let mut decoder = ffmpeg::codec::context::Context::from_parameters(parameters)
        .and_then(|ctx| ctx.decoder().video())
        .map_err(|e| CutterError::DecodeFailure(format!("无法创建视频解码器: {}", e)))?;
    let mut scaler = ffmpeg::software::scaling::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        ffmpeg::format::Pixel::RGB24,
        decoder.width(),
        decoder.height(),
        ffmpeg::software::scaling::Flags::BILINEAR,
    )
    .map_err(|e| CutterError::DecodeFailure(format!("无法创建缩放器: {}", e)))?;

    // 毫秒精度跳转到目标之前最近的关键帧，再向后解码
    let target = (seconds.max(0.0) * 1000.0).round() / 1000.0;
    let timestamp = (target * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
    if timestamp > 0 && ictx.seek(timestamp, ..timestamp).is_err() {
        return Ok(None);
    }

    let to_seconds = |ts: i64| {
        ts as f64 * f64::from(time_base.numerator()) / f64::from(time_base.denominator().max(1))
    };

    let mut decoded = ffmpeg::frame::Video::empty();
    for (stream, packet) in ictx.packets() {
        if stream.index() != stream_index {
            continue;
        }
        if decoder.send_packet(&packet).is_err() {
            continue;
        }
        while decoder.receive_frame(&mut decoded).is_ok() {
            let frame_time = decoded.timestamp().map(to_seconds).unwrap_or(target);
            // 容忍半毫秒误差
            if frame_time + 0.0005 < target {
                continue;
            }
            let mut rgb_frame = ffmpeg::frame::Video::empty();
            if scaler.run(&decoded, &mut rgb_frame).is_ok() {
                return Ok(Some(frame_to_image(&rgb_frame)));
            }
        }
    }
    Ok(None)
}

/// 将 RGB24 的 FFmpeg 帧转换为 RgbImage（逐行拷贝，跳过行尾填充）
fn frame_to_image(frame: &ffmpeg::frame::Video) -> RgbImage {
    let width = frame.width();
    let height = frame.height();
    let stride = frame.stride(0);
    let data = frame.data(0);
    let row_bytes = width as usize * 3;

    let mut buf = Vec::with_capacity(row_bytes * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        let end = start + row_bytes;
        if end > data.len() {
            break;
        }
        buf.extend_from_slice(&data[start..end]);
    }
    buf.resize(row_bytes * height as usize, 0);

    RgbImage::from_raw(width, height, buf).unwrap_or_else(|| RgbImage::new(width, height))
}
