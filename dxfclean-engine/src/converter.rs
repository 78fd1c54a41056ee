use dxfclean_core::{
    color::Rgb,
    drawing::Drawing,
    units::{Dimensions, Unit},
};
use dxfclean_io::{AuditReport, DxfFacade, ReadMode, ReadOutcome};
use dxfclean_render::{
    BackgroundPolicy, CleanedSvg, CleanupPolicy, ColorPolicy, Page, PageSettings, RenderConfig,
    RenderedSvg, SvgBackend, clean,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{ConversionError, MeasureError};
use crate::naming::svg_file_name;

/// 转换流程的可调参数。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConverterOptions {
    pub read_mode: ReadMode,
    pub color_policy: ColorPolicy,
    pub cleanup: CleanupPolicy,
    pub background: BackgroundPolicy,
    /// 输出线宽（毫米）。
    pub line_width: f64,
}

impl Default for ConverterOptions {
    fn default() -> Self {
        Self {
            read_mode: ReadMode::Recover,
            color_policy: ColorPolicy::Color,
            cleanup: CleanupPolicy::Strip,
            background: BackgroundPolicy::Off,
            line_width: 0.1,
        }
    }
}

/// 一次转换请求：原始 DXF 字节与所选单位。
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub raw_bytes: Vec<u8>,
    pub unit: Unit,
    pub file_name: Option<String>,
}

impl ConversionRequest {
    pub fn new(raw_bytes: impl Into<Vec<u8>>, unit: Unit) -> Self {
        Self {
            raw_bytes: raw_bytes.into(),
            unit,
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub svg: CleanedSvg,
    /// 尺寸不可用时为 `None`，不影响转换结果。
    pub dimensions: Option<Dimensions>,
    pub audit: AuditReport,
    pub suggested_file_name: Option<String>,
}

/// DXF → 清理后 SVG 的转换器。无内部状态，每次调用互相独立。
#[derive(Debug, Clone, Default)]
pub struct Converter {
    options: ConverterOptions,
}

impl Converter {
    pub fn new(options: ConverterOptions) -> Self {
        Self { options }
    }

    #[inline]
    pub fn options(&self) -> &ConverterOptions {
        &self.options
    }

    /// 解析 DXF。默认的恢复模式会修复轻微的结构损坏。
    pub fn parse(&self, raw_bytes: &[u8]) -> Result<ReadOutcome, ConversionError> {
        let outcome = DxfFacade::with_mode(self.options.read_mode).read_bytes(raw_bytes)?;
        if !outcome.audit.is_clean() {
            warn!(fixes = outcome.audit.fix_count(), "DXF 含有已修复的结构问题");
        }
        Ok(outcome)
    }

    /// 按单位比例渲染整个模型空间，不适配页面。
    pub fn render(&self, drawing: &Drawing, unit: Unit) -> Result<RenderedSvg, ConversionError> {
        let config = RenderConfig {
            background: self.options.background,
            background_color: Rgb::WHITE,
            color_policy: self.options.color_policy,
            line_width: self.options.line_width,
        };
        let settings = PageSettings {
            scale: unit.scale_factor(),
            fit_page: false,
            margin: 0.0,
        };
        let rendered = SvgBackend::render(drawing, &config, &Page::auto(), &settings)?;
        Ok(rendered)
    }

    pub fn clean(&self, rendered: &RenderedSvg) -> CleanedSvg {
        clean(rendered, self.options.cleanup)
    }

    /// 尽力计算尺寸；失败时返回 `None`。
    pub fn measure(&self, drawing: &Drawing, unit: Unit) -> Option<Dimensions> {
        match self.try_measure(drawing, unit) {
            Ok(dimensions) => Some(dimensions),
            Err(err) => {
                debug!(error = %err, "尺寸不可用");
                None
            }
        }
    }

    pub fn try_measure(&self, drawing: &Drawing, unit: Unit) -> Result<Dimensions, MeasureError> {
        let bounds = drawing.bounds().ok_or(MeasureError::EmptyDrawing)?;
        if !bounds.is_finite() {
            return Err(MeasureError::NonFiniteExtents);
        }
        let dimensions = Dimensions::from_native_mm(bounds.width(), bounds.height(), unit);
        if !dimensions.width.is_finite() || !dimensions.height.is_finite() {
            return Err(MeasureError::NonFiniteExtents);
        }
        Ok(dimensions)
    }

    /// 依次执行解析、渲染、清理与测量。解析或渲染失败时不返回任何输出。
    pub fn convert(&self, request: &ConversionRequest) -> Result<ConversionOutput, ConversionError> {
        info!(
            bytes = request.raw_bytes.len(),
            unit = %request.unit,
            file = request.file_name.as_deref().unwrap_or("<memory>"),
            "开始转换"
        );
        let ReadOutcome { drawing, audit } = self.parse(&request.raw_bytes)?;
        let rendered = self.render(&drawing, request.unit)?;
        let svg = self.clean(&rendered);
        let dimensions = self.measure(&drawing, request.unit);

        match &dimensions {
            Some(dimensions) => info!(%dimensions, "转换完成"),
            None => info!("转换完成，尺寸不可用"),
        }

        Ok(ConversionOutput {
            svg,
            dimensions,
            audit,
            suggested_file_name: request.file_name.as_deref().map(svg_file_name),
        })
    }
}
