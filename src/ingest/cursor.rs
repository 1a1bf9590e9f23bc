use crate::{Error, ErrorContext, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Feed position persisted as the raw cursor string in a text file.
#[derive(Debug, Clone)]
pub struct CursorFile {
    path: PathBuf,
}

impl CursorFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file means "start from the head of the feed".
    pub async fn load(&self) -> Result<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(raw.trim().to_string()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(Error::runtime_with_context(
                format!("cannot read cursor: {e}"),
                ErrorContext::new()
                    .with_field_path(self.path.display().to_string())
                    .with_source("cursor"),
            )),
        }
    }

    /// Write through a sibling temp file so a crash never leaves a truncated cursor.
    pub async fn save(&self, cursor: &str) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, cursor).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
