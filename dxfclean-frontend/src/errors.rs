use std::path::PathBuf;

use dxfclean_engine::ConversionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("读取输入文件 {path:?} 失败: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("写入输出 {path:?} 失败: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("输出文件 {0:?} 已存在，使用 `--overwrite` 覆盖")]
    OutputExists(PathBuf),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}
