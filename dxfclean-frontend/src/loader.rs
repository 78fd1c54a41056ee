use std::fs;
use std::path::Path;

use tracing::info;

use crate::errors::FrontendError;

/// 上传的文件：原始文件名与字节内容。
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// 从磁盘读取，文件名取路径的最后一段。
    pub fn from_path(path: &Path) -> Result<Self, FrontendError> {
        let bytes = fs::read(path).map_err(|source| FrontendError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "drawing.dxf".to_string());
        let upload = Self::new(name, bytes);
        info!(path = %path.display(), bytes = upload.len(), "已读取上传文件");
        Ok(upload)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
