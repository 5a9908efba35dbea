use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};

use crate::scene_detector::{DetectionConfig, DetectionPolicy};

/// 默认参考图（存在时才使用）
pub const DEFAULT_REFERENCE_IMAGE: &str = "template.jpg";

/// 应用配置（检测参数、目录、外部工具）
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// 切换点检测配置
    pub detection: DetectionConfig,
    /// 上传 / 下载的视频目录
    pub upload_dir: PathBuf,
    /// 剪辑产物目录
    pub results_dir: PathBuf,
    /// 封面目录
    pub thumbnail_dir: PathBuf,
    pub ffmpeg_bin: String,
    pub ytdlp_bin: String,
    pub whisper_bin: String,
    /// whisper 模型名
    pub whisper_model: String,
    /// 同时执行的任务数
    pub workers: usize,
    /// 日志级别（trace, debug, info, warn, error）
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            detection: DetectionConfig::default(),
            upload_dir: PathBuf::from("uploads"),
            results_dir: PathBuf::from("results"),
            thumbnail_dir: PathBuf::from("static/thumbnails"),
            ffmpeg_bin: "ffmpeg".to_string(),
            ytdlp_bin: "yt-dlp".to_string(),
            whisper_bin: "whisper".to_string(),
            whisper_model: "base".to_string(),
            workers: 2,
            log_level: "info".to_string(),
        }
    }
}

/// 命令行覆盖项
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub sensitivity: Option<u32>,
    pub policy: Option<DetectionPolicy>,
    pub reference_image: Option<PathBuf>,
    pub sample_every_second: Option<bool>,
    pub results_dir: Option<PathBuf>,
}

/// 配置文件中读到的原始值，缺失项为 None
#[derive(Debug, Clone, Default)]
struct PartialConfig {
    sensitivity: Option<u32>,
    policy: Option<DetectionPolicy>,
    reference_image: Option<PathBuf>,
    sample_every_second: Option<bool>,
    strong_match_threshold: Option<usize>,
    max_features: Option<usize>,
    analysis_width: Option<u32>,
    upload_dir: Option<PathBuf>,
    results_dir: Option<PathBuf>,
    thumbnail_dir: Option<PathBuf>,
    ffmpeg_bin: Option<String>,
    ytdlp_bin: Option<String>,
    whisper_bin: Option<String>,
    whisper_model: Option<String>,
    workers: Option<usize>,
    log_level: Option<String>,
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从多个源加载配置，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    pub fn load_config(config_file: Option<&Path>, overrides: ConfigOverrides) -> Result<AppConfig> {
        // 1. 配置文件：显式指定的文件必须可读，默认位置找不到则忽略
        let file = match config_file {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_from_default_locations().unwrap_or_default(),
        };

        // 2. 环境变量
        let env = Self::load_from_env();

        // 3. 合并
        let defaults = AppConfig::default();
        let reference_image = overrides
            .reference_image
            .or(env.reference_image)
            .or(file.reference_image)
            .or_else(|| {
                let default = PathBuf::from(DEFAULT_REFERENCE_IMAGE);
                default.exists().then_some(default)
            });

        let detection = DetectionConfig {
            policy: overrides
                .policy
                .or(env.policy)
                .or(file.policy)
                .unwrap_or(defaults.detection.policy),
            sensitivity: overrides
                .sensitivity
                .or(env.sensitivity)
                .or(file.sensitivity)
                .unwrap_or(defaults.detection.sensitivity),
            reference_image,
            sample_every_second: overrides
                .sample_every_second
                .or(env.sample_every_second)
                .or(file.sample_every_second)
                .unwrap_or(defaults.detection.sample_every_second),
            strong_match_threshold: file
                .strong_match_threshold
                .unwrap_or(defaults.detection.strong_match_threshold),
            max_features: file.max_features.unwrap_or(defaults.detection.max_features),
            analysis_width: file.analysis_width.unwrap_or(defaults.detection.analysis_width),
        };

        Ok(AppConfig {
            detection,
            upload_dir: env.upload_dir.or(file.upload_dir).unwrap_or(defaults.upload_dir),
            results_dir: overrides
                .results_dir
                .or(env.results_dir)
                .or(file.results_dir)
                .unwrap_or(defaults.results_dir),
            thumbnail_dir: env.thumbnail_dir.or(file.thumbnail_dir).unwrap_or(defaults.thumbnail_dir),
            ffmpeg_bin: env.ffmpeg_bin.or(file.ffmpeg_bin).unwrap_or(defaults.ffmpeg_bin),
            ytdlp_bin: env.ytdlp_bin.or(file.ytdlp_bin).unwrap_or(defaults.ytdlp_bin),
            whisper_bin: env.whisper_bin.or(file.whisper_bin).unwrap_or(defaults.whisper_bin),
            whisper_model: env.whisper_model.or(file.whisper_model).unwrap_or(defaults.whisper_model),
            workers: env.workers.or(file.workers).unwrap_or(defaults.workers).max(1),
            log_level: env.log_level.or(file.log_level).unwrap_or(defaults.log_level),
        })
    }

    /// 从环境变量加载（只返回读取到的项）
    fn load_from_env() -> PartialConfig {
        let var = |name: &str| env::var(name).ok().filter(|v| !v.is_empty());
        PartialConfig {
            sensitivity: var("VIDEO_CUTTER_SENSITIVITY").and_then(|v| v.parse().ok()),
            policy: var("VIDEO_CUTTER_POLICY").and_then(|v| v.parse().ok()),
            reference_image: var("VIDEO_CUTTER_REFERENCE").map(PathBuf::from),
            sample_every_second: var("VIDEO_CUTTER_SAMPLE_EVERY_SECOND").map(|v| parse_bool(&v)),
            upload_dir: var("VIDEO_CUTTER_UPLOAD_DIR").map(PathBuf::from),
            results_dir: var("VIDEO_CUTTER_RESULTS_DIR").map(PathBuf::from),
            thumbnail_dir: var("VIDEO_CUTTER_THUMBNAIL_DIR").map(PathBuf::from),
            ffmpeg_bin: var("VIDEO_CUTTER_FFMPEG"),
            ytdlp_bin: var("VIDEO_CUTTER_YTDLP"),
            whisper_bin: var("VIDEO_CUTTER_WHISPER"),
            whisper_model: var("VIDEO_CUTTER_WHISPER_MODEL"),
            workers: var("VIDEO_CUTTER_WORKERS").and_then(|v| v.parse().ok()),
            log_level: var("LOG_LEVEL"),
            ..Default::default()
        }
    }

    /// 从 INI 配置文件加载
    fn load_from_file(config_path: &Path) -> Result<PartialConfig> {
        if !config_path.exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {}", config_path.display()));
        }

        let mut ini = configparser::ini::Ini::new();
        ini.load(config_path)
            .map_err(|e| anyhow::anyhow!("读取配置文件失败: {}: {}", config_path.display(), e))?;

        // 先查指定节，再退回 [DEFAULT]（configparser 会把节名转为小写）
        let get = |section: &str, key: &str| {
            ini.get(section, key)
                .or_else(|| ini.get("default", key))
                .filter(|v| !v.is_empty())
        };

        Ok(PartialConfig {
            sensitivity: get("detection", "sensitivity").and_then(|v| v.parse().ok()),
            policy: get("detection", "policy").and_then(|v| v.parse().ok()),
            reference_image: get("detection", "reference_image").map(PathBuf::from),
            sample_every_second: get("detection", "sample_every_second").map(|v| parse_bool(&v)),
            strong_match_threshold: get("detection", "strong_match_threshold").and_then(|v| v.parse().ok()),
            max_features: get("detection", "max_features").and_then(|v| v.parse().ok()),
            analysis_width: get("detection", "analysis_width").and_then(|v| v.parse().ok()),
            upload_dir: get("paths", "upload_dir").map(PathBuf::from),
            results_dir: get("paths", "results_dir").map(PathBuf::from),
            thumbnail_dir: get("paths", "thumbnail_dir").map(PathBuf::from),
            ffmpeg_bin: get("tools", "ffmpeg"),
            ytdlp_bin: get("tools", "yt_dlp"),
            whisper_bin: get("tools", "whisper"),
            whisper_model: get("tools", "whisper_model"),
            workers: get("server", "workers").and_then(|v| v.parse().ok()),
            log_level: get("logging", "level"),
        })
    }

    /// 从默认位置加载配置文件
    fn load_from_default_locations() -> Result<PartialConfig> {
        let mut candidates = vec![PathBuf::from("video-cutter.ini"), PathBuf::from(".video-cutter.ini")];
        if let Some(home) = env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(".video-cutter.ini"));
        }
        candidates.push(PathBuf::from("/etc/video-cutter.ini"));

        for path in candidates {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }
        Err(anyhow::anyhow!("未找到配置文件"))
    }

    /// 创建默认配置文件
    pub fn create_default_config(config_path: &Path) -> Result<()> {
        let defaults = AppConfig::default();
        let detection = &defaults.detection;
        let mut ini = configparser::ini::Ini::new();
        let mut set = |section: &str, key: &str, value: String| {
            ini.set(section, key, Some(value));
        };

        set("detection", "policy", "cooldown".to_string());
        set("detection", "sensitivity", detection.sensitivity.to_string());
        set("detection", "reference_image", DEFAULT_REFERENCE_IMAGE.to_string());
        set("detection", "sample_every_second", detection.sample_every_second.to_string());
        set("detection", "strong_match_threshold", detection.strong_match_threshold.to_string());
        set("detection", "max_features", detection.max_features.to_string());
        set("detection", "analysis_width", detection.analysis_width.to_string());
        set("paths", "upload_dir", defaults.upload_dir.display().to_string());
        set("paths", "results_dir", defaults.results_dir.display().to_string());
        set("paths", "thumbnail_dir", defaults.thumbnail_dir.display().to_string());
        set("tools", "ffmpeg", defaults.ffmpeg_bin.clone());
        set("tools", "yt_dlp", defaults.ytdlp_bin.clone());
        set("tools", "whisper", defaults.whisper_bin.clone());
        set("tools", "whisper_model", defaults.whisper_model.clone());
        set("server", "workers", defaults.workers.to_string());
        set("logging", "level", defaults.log_level.clone());

        ini.write(config_path)
            .map_err(|e| anyhow::anyhow!("写入配置文件失败: {}: {}", config_path.display(), e))?;

        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
