use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use dxfclean_config::{AppConfig, ConfigError};
use dxfclean_core::units::Unit;
use dxfclean_engine::Converter;
use dxfclean_frontend::cli::ConvertJob;
use dxfclean_io::ReadMode;
use dxfclean_render::{BackgroundPolicy, CleanupPolicy, ColorPolicy};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

/// 把 DXF 图纸转换为可直接用于激光切割的 SVG。
#[derive(Parser, Debug)]
#[command(name = "dxfclean", version, about, long_about = None)]
struct Args {
    /// 待转换的 DXF 文件
    #[arg(required = true, value_name = "INPUT")]
    inputs: Vec<PathBuf>,

    /// 图纸原始单位：inches 或 millimeters
    #[arg(long)]
    unit: Option<Unit>,

    /// 所有线条输出为黑色
    #[arg(long)]
    black: bool,

    /// 画布矩形处理方式：strip 或 replace
    #[arg(long)]
    cleanup: Option<CleanupPolicy>,

    /// 绘制页面背景
    #[arg(long)]
    background: bool,

    /// 严格解析，不修复损坏的结构
    #[arg(long)]
    strict: bool,

    /// 输出线宽（毫米）
    #[arg(long, value_name = "MM")]
    line_width: Option<f64>,

    /// 输出目录，默认写在输入文件旁
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// 允许覆盖已有的 SVG
    #[arg(long)]
    overwrite: bool,

    /// 把 SVG 写到标准输出
    #[arg(long)]
    stdout: bool,

    /// 配置文件路径
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();
    let config = load_configuration(args.config.clone());
    init_logging(&config);
    info!("启动 dxfclean");

    match run(args, config) {
        Ok(0) => {}
        Ok(failures) => {
            error!(failures, "部分文件转换失败");
            std::process::exit(1);
        }
        Err(err) => {
            error!(error = %err, "无法开始转换");
            eprintln!("错误: {err:#}");
            std::process::exit(1);
        }
    }
}

/// 命令行参数覆盖配置文件中的值，返回失败的文件数量。
fn run(args: Args, mut config: AppConfig) -> Result<usize> {
    if args.stdout && args.inputs.len() > 1 {
        bail!("`--stdout` 只能与单个输入文件一起使用");
    }

    let conversion = &mut config.conversion;
    if let Some(unit) = args.unit {
        conversion.unit = unit;
    }
    if args.black {
        conversion.color_policy = ColorPolicy::Black;
    }
    if let Some(cleanup) = args.cleanup {
        conversion.cleanup = cleanup;
    }
    if args.background {
        conversion.background = BackgroundPolicy::On;
    }
    if args.strict {
        conversion.read_mode = ReadMode::Strict;
    }
    if let Some(width) = args.line_width {
        if !width.is_finite() || width <= 0.0 {
            bail!("线宽必须为正数，实际为 {width}");
        }
        conversion.line_width = width;
    }
    if let Some(dir) = args.output {
        config.output.directory = Some(dir);
    }
    if args.overwrite {
        config.output.overwrite = true;
    }

    if let Some(dir) = &config.output.directory {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("无法创建输出目录 {}", dir.display()))?;
    }

    let converter = Converter::new(config.conversion.converter_options());
    let jobs: Vec<ConvertJob> = args
        .inputs
        .into_iter()
        .map(|input| {
            let mut job = ConvertJob::from_config(input, &config);
            job.to_stdout = args.stdout;
            job
        })
        .collect();

    Ok(dxfclean_frontend::run_batch(&converter, &jobs))
}

fn load_configuration(override_path: Option<PathBuf>) -> AppConfig {
    match override_path {
        Some(path) => AppConfig::from_file(&path).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "加载指定配置失败，使用默认配置");
            AppConfig::default()
        }),
        None => match AppConfig::discover() {
            Ok(cfg) => cfg,
            Err(err) => {
                match &err {
                    ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                        warn!(path = %path.display(), error = %err, "加载默认配置失败，使用内建默认值");
                    }
                    ConfigError::Context { .. } => {
                        warn!(error = %err, "加载默认配置失败，使用内建默认值");
                    }
                }
                AppConfig::default()
            }
        },
    }
}

/// 日志写到 stderr，stdout 只留给 SVG 与摘要。
fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.logging.level.clone()))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}
