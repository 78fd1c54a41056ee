pub mod converter;

pub use converter::{ConversionOutput, ConversionRequest, Converter, ConverterOptions};

pub mod errors {
    use dxfclean_io::IoError;
    use dxfclean_render::RenderError;
    use thiserror::Error;

    /// 转换失败。解析与渲染错误会中止整个转换。
    #[derive(Debug, Error)]
    pub enum ConversionError {
        #[error("failed to parse DXF: {0}")]
        Parse(#[from] IoError),
        #[error("failed to render SVG: {0}")]
        Render(#[from] RenderError),
    }

    /// 尺寸不可用。只在内部传递，对外表现为 `None`。
    #[derive(Debug, Error, PartialEq, Eq)]
    pub enum MeasureError {
        #[error("drawing has no visible entities")]
        EmptyDrawing,
        #[error("drawing extents are not finite")]
        NonFiniteExtents,
    }
}

pub mod naming {
    /// SVG 下载使用的 MIME 类型。
    pub const SVG_MIME_TYPE: &str = "image/svg+xml";

    /// 由上传文件名推导输出文件名：`.dxf` 后缀（不区分大小写）换成 `.svg`，否则追加 `.svg`。
    pub fn svg_file_name(name: &str) -> String {
        let suffix_start = name.len().saturating_sub(4);
        match name.get(suffix_start..) {
            Some(suffix) if suffix.eq_ignore_ascii_case(".dxf") && suffix_start > 0 => {
                format!("{}.svg", &name[..suffix_start])
            }
            _ => format!("{name}.svg"),
        }
    }

}

pub use errors::{ConversionError, MeasureError};
pub use naming::{SVG_MIME_TYPE, svg_file_name};
