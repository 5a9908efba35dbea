use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use video_cutter::{
    analyze_video, config::ConfigLoader, handler, job::validate_jobs, AnalysisContext, AppConfig, ConfigOverrides,
    DetectionPolicy, FfmpegChangeDetection, FfmpegProbe, FfmpegThumbnailer, FfmpegTranscoder, JobExecutor, JobSpec,
    LocalTaskQueue, MediaProbe, Orchestrator, VideoDownloader, WhisperTranscriber, YtDlpDownloader,
};

/// 视频剪辑工具 - 自动检测切换点、规划片段、输出视频 / 音频 / 文字
#[derive(Parser, Debug)]
#[command(name = "video-cutter")]
#[command(about = "视频剪辑工具：检测场景切换、按片段输出视频 / 音频 / 文字", long_about = None)]
struct Args {
    /// 配置文件路径（可选，支持 .ini 格式）
    /// 优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 分析视频，输出切换点和片段（JSON）
    Analyze {
        /// 本地视频文件路径
        #[arg(short, long, conflicts_with = "url")]
        input: Option<PathBuf>,

        /// 远程视频地址（使用 yt-dlp 下载）
        #[arg(long)]
        url: Option<String>,

        /// 灵敏度，可通过环境变量 VIDEO_CUTTER_SENSITIVITY 或配置文件设置
        #[arg(long)]
        sensitivity: Option<u32>,

        /// 检测策略：first_match | cooldown
        #[arg(long)]
        policy: Option<DetectionPolicy>,

        /// 参考图路径
        #[arg(long)]
        reference: Option<PathBuf>,

        /// FirstMatch 策略下每秒只分析一帧
        #[arg(long)]
        sample_every_second: bool,
    },
    /// 按任务列表剪辑视频
    Process {
        /// 输入视频文件路径
        #[arg(short, long)]
        input: PathBuf,

        /// 任务列表 JSON 文件（[{"start":0,"end":5,"formats":["video"]}]）
        #[arg(short, long)]
        jobs: PathBuf,

        /// 输出目录
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 拼接为一个合并文件
        #[arg(long)]
        concatenate: bool,
    },
    /// Web 服务模式
    Serve {
        /// 监听地址（默认 0.0.0.0:9000）
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// 生成默认配置文件
    InitConfig {
        #[arg(default_value = "video-cutter.ini")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let overrides = match &args.command {
        Commands::Analyze {
            sensitivity,
            policy,
            reference,
            sample_every_second,
            ..
        } => ConfigOverrides {
            sensitivity: *sensitivity,
            policy: *policy,
            reference_image: reference.clone(),
            sample_every_second: sample_every_second.then_some(true),
            ..Default::default()
        },
        Commands::Process { output, .. } => ConfigOverrides {
            results_dir: output.clone(),
            ..Default::default()
        },
        _ => ConfigOverrides::default(),
    };
    let config = ConfigLoader::load_config(args.config.as_deref(), overrides).context("加载配置失败")?;

    // 初始化日志
    let level = config.log_level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    match args.command {
        Commands::Analyze { input, url, .. } => {
            let video = match (input, url) {
                (Some(path), _) => path,
                (None, Some(url)) => YtDlpDownloader::new(&config.ytdlp_bin)
                    .download(&url, &config.upload_dir)
                    .context("下载视频失败")?,
                (None, None) => anyhow::bail!("需要提供 --input 或 --url"),
            };
            let ctx = analysis_context(&config);
            let detection = config.detection.clone();
            let result = tokio::task::spawn_blocking(move || {
                analyze_video(&video, &detection, &ctx, &|m: &str| tracing::info!("{}", m))
            })
            .await
            .context("分析任务异常终止")?
            .context("分析视频失败")?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Process {
            input,
            jobs,
            concatenate,
            ..
        } => {
            let content = std::fs::read_to_string(&jobs).context(format!("读取任务文件失败: {}", jobs.display()))?;
            let jobs: Vec<JobSpec> = serde_json::from_str(&content).context("解析任务文件失败")?;
            let duration = FfmpegProbe.probe(&input).context("读取视频时长失败")?.duration;
            let jobs = validate_jobs(jobs, duration).context("任务参数错误")?;

            let executor = job_executor(&config);
            let output_dir = config.results_dir.clone();
            let result = tokio::task::spawn_blocking(move || {
                let report = |m: &str| tracing::info!("{}", m);
                if concatenate {
                    executor.run_concatenated(&input, &jobs, &output_dir, &report)
                } else {
                    executor.run(&input, &jobs, &output_dir, &report)
                }
            })
            .await
            .context("剪辑任务异常终止")?
            .context("剪辑失败")?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Serve { bind } => {
            let bind_addr = bind.unwrap_or_else(|| "0.0.0.0:9000".to_string());
            start_web_server(&bind_addr, config).await?;
        }
        Commands::InitConfig { path } => {
            ConfigLoader::create_default_config(&path).context("生成配置文件失败")?;
            println!("已生成配置文件: {}", path.display());
        }
    }

    Ok(())
}

fn analysis_context(config: &AppConfig) -> AnalysisContext {
    AnalysisContext {
        probe: Arc::new(FfmpegProbe),
        detection: Arc::new(FfmpegChangeDetection),
        thumbnails: Arc::new(FfmpegThumbnailer::new(&config.thumbnail_dir)),
    }
}

fn job_executor(config: &AppConfig) -> JobExecutor {
    JobExecutor::new(
        Arc::new(FfmpegTranscoder::new(&config.ffmpeg_bin)),
        Arc::new(WhisperTranscriber::new(&config.whisper_bin, config.whisper_model.clone())),
        Arc::new(FfmpegProbe),
    )
}

async fn start_web_server(bind: &str, config: AppConfig) -> Result<()> {
    for dir in [&config.upload_dir, &config.results_dir, &config.thumbnail_dir] {
        std::fs::create_dir_all(dir).context(format!("创建目录失败: {}", dir.display()))?;
    }

    let queue = LocalTaskQueue::new(config.workers).context("创建任务队列失败")?;
    let orchestrator = Orchestrator::new(
        Arc::new(queue),
        analysis_context(&config),
        job_executor(&config),
        Arc::new(YtDlpDownloader::new(&config.ytdlp_bin)),
        config.upload_dir.clone(),
    );
    let app = handler::router(handler::AppState {
        orchestrator: Arc::new(orchestrator),
        config: Arc::new(config),
    });

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .context(format!("绑定地址失败: {}", bind))?;

    tracing::info!("Web 服务器启动在: http://{}", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("可用端点:");
    tracing::info!("  • 健康检查: GET  http://{}/health", bind);
    tracing::info!("  • 上传视频: POST http://{}/upload", bind);
    tracing::info!("  • 提交分析: POST http://{}/analysis", bind);
    tracing::info!("  • 提交剪辑: POST http://{}/process", bind);
    tracing::info!("  • 任务进度: GET  http://{}/status/<task_id>", bind);
    tracing::info!("  • 剪辑产物: GET  http://{}/results/<file>", bind);
    tracing::info!("  • 片段封面: GET  http://{}/thumbnails/<file>", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    axum::serve(listener, app)
        .await
        .context("启动服务器失败")?;

    Ok(())
}
