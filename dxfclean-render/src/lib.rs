pub mod backend;
pub mod cleanup;

pub use backend::SvgBackend;
pub use cleanup::{CleanedSvg, CleanupPolicy, clean};

use std::fmt;

use dxfclean_core::color::Rgb;
use serde::{Deserialize, Serialize};

pub mod errors {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum RenderError {
        #[error("scale factor must be a finite positive number, got {0}")]
        InvalidScale(f64),
        #[error("invalid page size {width} x {height} mm")]
        InvalidPage { width: f64, height: f64 },
        #[error("drawing extents are not finite")]
        NonFiniteGeometry,
        #[error("line width must be a finite positive number, got {0}")]
        InvalidLineWidth(f64),
    }
}

pub use errors::RenderError;

/// 是否绘制页面背景。关闭时画布矩形不填充。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundPolicy {
    #[default]
    Off,
    On,
}

/// 描边颜色策略：保留实体原色，或全部输出为黑色。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColorPolicy {
    #[default]
    Color,
    Black,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderConfig {
    pub background: BackgroundPolicy,
    /// 纸面颜色；同时决定 ACI 7 绘制为黑色还是白色。
    pub background_color: Rgb,
    pub color_policy: ColorPolicy,
    /// 输出线宽（毫米）。
    pub line_width: f64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            background: BackgroundPolicy::Off,
            background_color: Rgb::WHITE,
            color_policy: ColorPolicy::Color,
            line_width: 0.1,
        }
    }
}

/// 页面尺寸（毫米）。宽或高为 0 时按内容自动确定。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Page {
    pub width: f64,
    pub height: f64,
}

impl Page {
    /// 尺寸完全由内容决定的页面。
    #[inline]
    pub fn auto() -> Self {
        Self::default()
    }

    #[inline]
    pub fn fixed(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn is_auto(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSettings {
    /// 图纸单位到输出毫米的比例。
    pub scale: f64,
    /// 固定页面时是否缩放内容以适应页面。
    pub fit_page: bool,
    /// 页边距（毫米）。
    pub margin: f64,
}

impl PageSettings {
    pub fn with_scale(scale: f64) -> Self {
        Self {
            scale,
            ..Self::default()
        }
    }
}

impl Default for PageSettings {
    fn default() -> Self {
        Self {
            scale: 1.0,
            fit_page: false,
            margin: 0.0,
        }
    }
}

/// 渲染器的原始输出，包含页面画布矩形。
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSvg {
    pub markup: String,
    /// 输出宽度（毫米）。
    pub width: f64,
    /// 输出高度（毫米）。
    pub height: f64,
}

impl RenderedSvg {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.markup
    }
}

impl fmt::Display for RenderedSvg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.markup)
    }
}
