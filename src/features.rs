//! 参考图特征匹配
//!
//! 角点检测使用 Sobel 梯度上的 Harris 响应，描述子为 256 位二值描述子
//! （平滑后的图块内固定点对的亮度比较），匹配使用汉明距离 + 最近邻比值检验。

use image::GrayImage;
use std::path::Path;

use crate::error::{CutterError, CutterResult};

/// 最近邻比值检验系数
pub const RATIO_TEST: f64 = 0.75;

/// 描述子图块半径（31x31）
const PATCH_RADIUS: i32 = 15;
/// 平滑窗口半径（5x5 盒式滤波）
const SMOOTH_RADIUS: i32 = 2;
/// 角点到图像边缘的最小距离
const BORDER: u32 = (PATCH_RADIUS + SMOOTH_RADIUS + 1) as u32;
/// Harris 响应窗口半径
const HARRIS_WINDOW: i32 = 2;
const HARRIS_K: f64 = 0.04;
/// 低于该响应的点视为噪声
const MIN_RESPONSE: f64 = 1.0e8;
/// 相对最大响应的阈值比例
const RELATIVE_RESPONSE: f64 = 0.01;

const SOBEL_X: [[i32; 3]; 3] = [[-1, 0, 1], [-2, 0, 2], [-1, 0, 1]];
const SOBEL_Y: [[i32; 3]; 3] = [[-1, -2, -1], [0, 0, 0], [1, 2, 1]];

/// 角点
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: u32,
    pub y: u32,
    pub response: f64,
}

/// 256 位二值描述子
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor([u64; 4]);

impl Descriptor {
    /// 汉明距离
    pub fn distance(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// 特征提取器
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    max_features: usize,
    pattern: Vec<(i32, i32, i32, i32)>,
}

impl FeatureExtractor {
    pub fn new(max_features: usize) -> Self {
        Self {
            max_features: max_features.max(1),
            pattern: sampling_pattern(),
        }
    }

    /// 检测角点并计算描述子，纯色图像返回空
    pub fn detect_and_compute(&self, gray: &GrayImage) -> Vec<Descriptor> {
        let keypoints = self.detect(gray);
        if keypoints.is_empty() {
            return Vec::new();
        }
        let integral = IntegralImage::new(gray);
        keypoints
            .iter()
            .map(|kp| self.describe(&integral, kp))
            .collect()
    }

    /// Harris 角点检测 + 3x3 非极大值抑制，按响应取前 `max_features` 个
    pub fn detect(&self, gray: &GrayImage) -> Vec<Keypoint> {
        let (width, height) = gray.dimensions();
        if width <= 2 * BORDER || height <= 2 * BORDER {
            return Vec::new();
        }

        let response = harris_response(gray);
        let max_response = response.iter().cloned().fold(0.0_f64, f64::max);
        let threshold = (max_response * RELATIVE_RESPONSE).max(MIN_RESPONSE);
        if max_response <= threshold {
            return Vec::new();
        }

        let w = width as usize;
        let mut keypoints = Vec::new();
        for y in BORDER..height - BORDER {
            for x in BORDER..width - BORDER {
                let idx = y as usize * w + x as usize;
                let r = response[idx];
                if r <= threshold {
                    continue;
                }
                let is_peak = (-1i32..=1).all(|dy| {
                    (-1i32..=1).all(|dx| {
                        if dx == 0 && dy == 0 {
                            return true;
                        }
                        let n = (y as i32 + dy) as usize * w + (x as i32 + dx) as usize;
                        r > response[n]
                    })
                });
                if is_peak {
                    keypoints.push(Keypoint { x, y, response: r });
                }
            }
        }

        keypoints.sort_by(|a, b| b.response.total_cmp(&a.response));
        keypoints.truncate(self.max_features);
        keypoints
    }

    fn describe(&self, integral: &IntegralImage, kp: &Keypoint) -> Descriptor {
        let mut bits = [0u64; 4];
        let (cx, cy) = (kp.x as i32, kp.y as i32);
        for (i, &(x1, y1, x2, y2)) in self.pattern.iter().enumerate() {
            let a = integral.box_sum(cx + x1, cy + y1, SMOOTH_RADIUS);
            let b = integral.box_sum(cx + x2, cy + y2, SMOOTH_RADIUS);
            if a < b {
                bits[i / 64] |= 1 << (i % 64);
            }
        }
        Descriptor(bits)
    }
}

/// 统计通过比值检验的匹配数
///
/// 对每个参考描述子找出帧中最近与次近的描述子，
/// 只有最近距离小于 0.75 倍次近距离时才计为有效匹配。
pub fn count_good_matches(reference: &[Descriptor], frame: &[Descriptor]) -> usize {
    if frame.len() < 2 {
        return 0;
    }
    reference
        .iter()
        .filter(|r| {
            let mut best = u32::MAX;
            let mut second = u32::MAX;
            for d in frame {
                let dist = r.distance(d);
                if dist < best {
                    second = best;
                    best = dist;
                } else if dist < second {
                    second = dist;
                }
            }
            f64::from(best) < RATIO_TEST * f64::from(second)
        })
        .count()
}

/// 参考图的预计算描述子
#[derive(Debug, Clone)]
pub struct ReferenceMatcher {
    extractor: FeatureExtractor,
    descriptors: Vec<Descriptor>,
}

impl ReferenceMatcher {
    /// 读取参考图，按分析宽度缩放后提取描述子
    pub fn load(path: &Path, max_features: usize, max_width: Option<u32>) -> CutterResult<Self> {
        if !path.exists() {
            return Err(CutterError::ReferenceUnavailable(format!(
                "文件不存在: {}",
                path.display()
            )));
        }
        let img = image::open(path).map_err(|e| {
            CutterError::ReferenceUnavailable(format!("无法读取 {}: {}", path.display(), e))
        })?;
        let img = match max_width {
            Some(max) if max > 0 && img.width() > max => {
                let h = ((f64::from(img.height()) * f64::from(max) / f64::from(img.width())).round()
                    as u32)
                    .max(1);
                img.resize_exact(max, h, image::imageops::FilterType::Triangle)
            }
            _ => img,
        };
        Self::from_gray(&img.to_luma8(), max_features)
    }

    pub fn from_gray(gray: &GrayImage, max_features: usize) -> CutterResult<Self> {
        let extractor = FeatureExtractor::new(max_features);
        let descriptors = extractor.detect_and_compute(gray);
        if descriptors.is_empty() {
            return Err(CutterError::ReferenceUnavailable(
                "参考图中未检测到特征点".to_string(),
            ));
        }
        Ok(Self {
            extractor,
            descriptors,
        })
    }

    pub fn descriptor_count(&self) -> usize {
        self.descriptors.len()
    }

    /// 返回帧与参考图的有效匹配数；帧中没有特征点时返回 `None`
    pub fn match_frame(&self, gray: &GrayImage) -> Option<usize> {
        let frame_descriptors = self.extractor.detect_and_compute(gray);
        if frame_descriptors.is_empty() {
            return None;
        }
        Some(count_good_matches(&self.descriptors, &frame_descriptors))
    }
}

/// 灰度积分图，用于盒式平滑
struct IntegralImage {
    width: usize,
    height: usize,
    sums: Vec<u64>,
}

impl IntegralImage {
    fn new(gray: &GrayImage) -> Self {
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let stride = w + 1;
        let mut sums = vec![0u64; stride * (h + 1)];
        for y in 0..h {
            let mut row = 0u64;
            for x in 0..w {
                row += u64::from(gray.get_pixel(x as u32, y as u32)[0]);
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
            }
        }
        Self {
            width: w,
            height: h,
            sums,
        }
    }

    /// 以 (cx, cy) 为中心、半径 r 的方框内像素和（越界部分截断）
    fn box_sum(&self, cx: i32, cy: i32, r: i32) -> u64 {
        let x0 = (cx - r).clamp(0, self.width as i32) as usize;
        let y0 = (cy - r).clamp(0, self.height as i32) as usize;
        let x1 = (cx + r + 1).clamp(0, self.width as i32) as usize;
        let y1 = (cy + r + 1).clamp(0, self.height as i32) as usize;
        let stride = self.width + 1;
        self.sums[y1 * stride + x1] + self.sums[y0 * stride + x0]
            - self.sums[y0 * stride + x1]
            - self.sums[y1 * stride + x0]
    }
}

/// 计算每个像素的 Harris 响应，边缘一圈为 0
fn harris_response(gray: &GrayImage) -> Vec<f64> {
    let (width, height) = gray.dimensions();
    let (w, h) = (width as usize, height as usize);
    let mut ixx = vec![0.0f64; w * h];
    let mut iyy = vec![0.0f64; w * h];
    let mut ixy = vec![0.0f64; w * h];

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let mut gx = 0i32;
            let mut gy = 0i32;
            for ky in 0..3 {
                for kx in 0..3 {
                    let pixel = i32::from(gray.get_pixel((x + kx - 1) as u32, (y + ky - 1) as u32)[0]);
                    gx += pixel * SOBEL_X[ky][kx];
                    gy += pixel * SOBEL_Y[ky][kx];
                }
            }
            let (gx, gy) = (f64::from(gx), f64::from(gy));
            let idx = y * w + x;
            ixx[idx] = gx * gx;
            iyy[idx] = gy * gy;
            ixy[idx] = gx * gy;
        }
    }

    let mut response = vec![0.0f64; w * h];
    let r = HARRIS_WINDOW as usize;
    for y in (r + 1)..h.saturating_sub(r + 1) {
        for x in (r + 1)..w.saturating_sub(r + 1) {
            let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
            for wy in (y - r)..=(y + r) {
                for wx in (x - r)..=(x + r) {
                    let idx = wy * w + wx;
                    sxx += ixx[idx];
                    syy += iyy[idx];
                    sxy += ixy[idx];
                }
            }
            let det = sxx * syy - sxy * sxy;
            let trace = sxx + syy;
            response[y * w + x] = det - HARRIS_K * trace * trace;
        }
    }
    response
}

/// 固定的描述子采样点对（xorshift 生成，保证每次运行一致）
fn sampling_pattern() -> Vec<(i32, i32, i32, i32)> {
    let mut state: u32 = 0x9E37_79B9;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        (state % (2 * PATCH_RADIUS as u32 + 1)) as i32 - PATCH_RADIUS
    };
    let mut pattern = Vec::with_capacity(256);
    while pattern.len() < 256 {
        let pair = (next(), next(), next(), next());
        if (pair.0, pair.1) != (pair.2, pair.3) {
            pattern.push(pair);
        }
    }
    pattern
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Luma;

    /// 8x8 随机灰度块组成的纹理图
    pub(crate) fn block_pattern(width: u32, height: u32, seed: u32) -> GrayImage {
        let mut state = seed.max(1);
        let cols = width.div_ceil(8);
        let rows = height.div_ceil(8);
        let mut blocks = Vec::with_capacity((cols * rows) as usize);
        for _ in 0..cols * rows {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            blocks.push((state % 256) as u8);
        }
        GrayImage::from_fn(width, height, |x, y| Luma([blocks[((y / 8) * cols + x / 8) as usize]]))
    }

    #[test]
    fn test_flat_image_has_no_keypoints() {
        let extractor = FeatureExtractor::new(500);
        let flat = GrayImage::from_pixel(160, 120, Luma([128]));
        assert!(extractor.detect_and_compute(&flat).is_empty());
    }

    #[test]
    fn test_textured_image_has_keypoints() {
        let extractor = FeatureExtractor::new(500);
        let img = block_pattern(160, 120, 7);
        let keypoints = extractor.detect(&img);
        assert!(keypoints.len() > 20, "检测到 {} 个角点", keypoints.len());
        for kp in &keypoints {
            assert!(kp.x >= BORDER && kp.x < 160 - BORDER);
            assert!(kp.y >= BORDER && kp.y < 120 - BORDER);
        }
    }

    #[test]
    fn test_identical_image_matches_strongly() {
        let img = block_pattern(160, 120, 7);
        let matcher = ReferenceMatcher::from_gray(&img, 500).unwrap();
        let matches = matcher.match_frame(&img).unwrap();
        assert!(matches > matcher.descriptor_count() / 2);
    }

    #[test]
    fn test_unrelated_image_matches_weakly() {
        let reference = block_pattern(160, 120, 7);
        let other = block_pattern(160, 120, 12345);
        let matcher = ReferenceMatcher::from_gray(&reference, 500).unwrap();
        let same = matcher.match_frame(&reference).unwrap();
        let different = matcher.match_frame(&other).unwrap_or(0);
        assert!(different < same / 2, "same={}, different={}", same, different);
    }

    #[test]
    fn test_missing_reference_is_unavailable() {
        let result = ReferenceMatcher::load(Path::new("/nonexistent/template.jpg"), 500, None);
        assert!(matches!(result, Err(CutterError::ReferenceUnavailable(_))));
    }

    #[test]
    fn test_flat_reference_is_unavailable() {
        let flat = GrayImage::from_pixel(160, 120, Luma([10]));
        assert!(matches!(
            ReferenceMatcher::from_gray(&flat, 500),
            Err(CutterError::ReferenceUnavailable(_))
        ));
    }

    #[test]
    fn test_hamming_distance() {
        let a = Descriptor([0, 0, 0, 0]);
        let b = Descriptor([0b1011, 0, 0, 1 << 63]);
        assert_eq!(a.distance(&b), 4);
        assert_eq!(b.distance(&b), 0);
    }
}
