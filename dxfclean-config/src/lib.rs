use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dxfclean_core::units::Unit;
use dxfclean_engine::ConverterOptions;
use dxfclean_io::ReadMode;
use dxfclean_render::{BackgroundPolicy, CleanupPolicy, ColorPolicy};
use serde::Deserialize;
use thiserror::Error;

/// 指定配置文件路径的环境变量。
pub const CONFIG_ENV: &str = "DXFCLEAN_CONFIG";

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 自动发现配置文件：优先读取环境变量 `DXFCLEAN_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 转换参数，字段缺省时取转换器的默认值。
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ConversionConfig {
    #[serde(default)]
    pub unit: Unit,
    #[serde(default)]
    pub color_policy: ColorPolicy,
    #[serde(default)]
    pub cleanup: CleanupPolicy,
    #[serde(default)]
    pub background: BackgroundPolicy,
    #[serde(default = "ConversionConfig::default_line_width")]
    pub line_width: f64,
    #[serde(default)]
    pub read_mode: ReadMode,
}

impl ConversionConfig {
    fn default_line_width() -> f64 {
        0.1
    }

    pub fn converter_options(&self) -> ConverterOptions {
        ConverterOptions {
            read_mode: self.read_mode,
            color_policy: self.color_policy,
            cleanup: self.cleanup,
            background: self.background,
            line_width: self.line_width,
        }
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            unit: Unit::default(),
            color_policy: ColorPolicy::default(),
            cleanup: CleanupPolicy::default(),
            background: BackgroundPolicy::default(),
            line_width: Self::default_line_width(),
            read_mode: ReadMode::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// 输出目录；为空时写在输入文件旁。
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_converter_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.conversion.unit, Unit::Millimeters);
        assert_eq!(cfg.conversion.converter_options(), ConverterOptions::default());
        assert!(cfg.output.directory.is_none());
        assert!(!cfg.output.overwrite);
    }

    #[test]
    fn load_from_temp_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(
            file,
            r#"
            [logging]
            level = "debug"

            [conversion]
            unit = "inches"
            color_policy = "black"
            cleanup = "replace"
            background = "on"
            line_width = 0.25
            read_mode = "strict"

            [output]
            directory = "../out"
            overwrite = true
            "#
        )
        .expect("write temp config");

        let cfg = AppConfig::from_file(file.path()).expect("load config");
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.conversion.unit, Unit::Inches);
        let options = cfg.conversion.converter_options();
        assert_eq!(options.color_policy, ColorPolicy::Black);
        assert_eq!(options.cleanup, CleanupPolicy::Replace);
        assert_eq!(options.background, BackgroundPolicy::On);
        assert_eq!(options.read_mode, ReadMode::Strict);
        assert!((options.line_width - 0.25).abs() < 1e-12);
        assert_eq!(
            cfg.output
                .directory
                .as_deref()
                .map(|p| p.to_string_lossy().to_string()),
            Some("../out".to_string())
        );
        assert!(cfg.output.overwrite);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "[conversion]\ncleanup = \"replace\"").expect("write temp config");

        let cfg = AppConfig::from_file(file.path()).expect("load config");
        assert_eq!(cfg.conversion.cleanup, CleanupPolicy::Replace);
        assert_eq!(cfg.conversion.read_mode, ReadMode::Recover);
        assert!((cfg.conversion.line_width - 0.1).abs() < 1e-12);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn invalid_values_report_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "[conversion]\nunit = \"furlongs\"").expect("write temp config");

        let err = AppConfig::from_file(file.path()).expect_err("unknown unit should fail");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_reports_io_error() {
        let err = AppConfig::from_file("/definitely/not/here/dxfclean.toml")
            .expect_err("missing file should fail");
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
