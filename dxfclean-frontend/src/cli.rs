use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use dxfclean_config::AppConfig;
use dxfclean_core::units::{Dimensions, Unit};
use dxfclean_engine::{ConversionRequest, Converter, SVG_MIME_TYPE, svg_file_name};
use tracing::{info, warn};

use crate::errors::FrontendError;
use crate::loader::UploadedFile;

/// 单个输入文件的转换任务。
#[derive(Debug, Clone)]
pub struct ConvertJob {
    pub input: PathBuf,
    pub unit: Unit,
    /// 为空时输出写在输入文件旁。
    pub output_dir: Option<PathBuf>,
    pub overwrite: bool,
    pub to_stdout: bool,
}

impl ConvertJob {
    pub fn new(input: impl Into<PathBuf>, unit: Unit) -> Self {
        Self {
            input: input.into(),
            unit,
            output_dir: None,
            overwrite: false,
            to_stdout: false,
        }
    }

    /// 以配置文件中的单位与输出设置构造任务。
    pub fn from_config(input: impl Into<PathBuf>, config: &AppConfig) -> Self {
        Self {
            input: input.into(),
            unit: config.conversion.unit,
            output_dir: config.output.directory.clone(),
            overwrite: config.output.overwrite,
            to_stdout: false,
        }
    }

    /// 输出文件路径：输出目录（或输入所在目录）下的 `<名称>.svg`。
    pub fn output_path(&self, file_name: &str) -> PathBuf {
        let directory = match &self.output_dir {
            Some(dir) => dir.clone(),
            None => self
                .input
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };
        directory.join(svg_file_name(file_name))
    }
}

/// 转换结果摘要，供终端展示。
#[derive(Debug, Clone)]
pub struct ConvertSummary {
    pub input: PathBuf,
    /// 写入 stdout 时为 `None`。
    pub output: Option<PathBuf>,
    pub dimensions: Option<Dimensions>,
    pub bytes_written: usize,
    pub fixes: usize,
    pub unsupported: BTreeMap<String, usize>,
}

impl fmt::Display for ConvertSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.output {
            Some(path) => writeln!(
                f,
                "{} → {} ({} 字节, {SVG_MIME_TYPE})",
                self.input.display(),
                path.display(),
                self.bytes_written
            )?,
            None => writeln!(f, "{} → <stdout> ({} 字节)", self.input.display(), self.bytes_written)?,
        }
        match &self.dimensions {
            Some(dimensions) => writeln!(f, "  尺寸: {dimensions}")?,
            None => writeln!(f, "  尺寸: 不可用")?,
        }
        if self.fixes > 0 {
            writeln!(f, "  恢复模式修复: {} 处", self.fixes)?;
        }
        if !self.unsupported.is_empty() {
            let skipped: Vec<String> = self
                .unsupported
                .iter()
                .map(|(kind, count)| format!("{kind}×{count}"))
                .collect();
            writeln!(f, "  已跳过不支持的实体: {}", skipped.join(", "))?;
        }
        Ok(())
    }
}

/// 读取输入、转换并写出 SVG。除非允许覆盖，否则不会替换已有文件。
pub fn run_job(converter: &Converter, job: &ConvertJob) -> Result<ConvertSummary, FrontendError> {
    let upload = UploadedFile::from_path(&job.input)?;
    if upload.is_empty() {
        warn!(input = %job.input.display(), "输入文件为空");
    }
    let target = (!job.to_stdout).then(|| job.output_path(&upload.name));
    if let Some(path) = &target {
        if path.exists() && !job.overwrite {
            return Err(FrontendError::OutputExists(path.clone()));
        }
    }

    let request = ConversionRequest::new(upload.bytes, job.unit).with_file_name(upload.name);
    let output = converter.convert(&request)?;

    let bytes = output.svg.as_bytes();
    match &target {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|source| FrontendError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::write(path, bytes).map_err(|source| FrontendError::Write {
                path: path.clone(),
                source,
            })?;
            info!(path = %path.display(), bytes = bytes.len(), "已写出 SVG");
        }
        None => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(bytes)
                .and_then(|_| handle.flush())
                .map_err(|source| FrontendError::Write {
                    path: PathBuf::from("<stdout>"),
                    source,
                })?;
        }
    }

    if output.dimensions.is_none() {
        warn!(input = %job.input.display(), "无法计算图纸尺寸");
    }

    Ok(ConvertSummary {
        input: job.input.clone(),
        output: target,
        dimensions: output.dimensions,
        bytes_written: bytes.len(),
        fixes: output.audit.fix_count(),
        unsupported: output.audit.unsupported().clone(),
    })
}

/// 打印摘要；SVG 写往 stdout 时改用 stderr，避免混入输出。
pub fn print_summary(summary: &ConvertSummary) {
    if summary.output.is_some() {
        print!("{summary}");
    } else {
        eprint!("{summary}");
    }
}
