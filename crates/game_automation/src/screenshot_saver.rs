//! Screenshot saving utilities for persisting captures to disk

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::AutomationConfig;
use crate::error::Result;
use crate::store::{NewScreenshot, ScreenshotType};
use crate::workflow::RunId;

pub const PNG_MIME_TYPE: &str = "image/png";
pub const SCREENSHOT_SOURCE: &str = "automation_workflow";

/// A capture written to disk
#[derive(Debug, Clone, PartialEq)]
pub struct SavedScreenshot {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
    pub width: u32,
    pub height: u32,
}

impl SavedScreenshot {
    /// Metadata for `RunStore::create_screenshot_record`
    pub fn to_new_screenshot(&self) -> NewScreenshot {
        NewScreenshot {
            path: self.path.to_string_lossy().into_owned(),
            file_name: self.file_name.clone(),
            size_bytes: self.size_bytes,
            mime_type: PNG_MIME_TYPE.to_string(),
            width: self.width,
            height: self.height,
            screenshot_type: ScreenshotType::GameLoading,
            metadata: serde_json::json!({ "source": SCREENSHOT_SOURCE }),
        }
    }
}

/// Writes captures as `{prefix}_workflow_{run_id}_{unix_ts}.png`
#[derive(Debug, Clone)]
pub struct ScreenshotSaver {
    dir: PathBuf,
    prefix: String,
    fallback_dimensions: (u32, u32),
}

impl ScreenshotSaver {
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        fallback_dimensions: (u32, u32),
    ) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            fallback_dimensions,
        }
    }

    pub fn from_config(config: &AutomationConfig) -> Self {
        Self::new(
            config.screenshot_dir.clone(),
            config.target.screenshot_prefix.clone(),
            config.fallback_dimensions,
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(&self, run_id: RunId, unix_ts: i64) -> String {
        format!("{}_workflow_{}_{}.png", self.prefix, run_id, unix_ts)
    }

    /// Save PNG bytes for `run_id`, creating the directory when missing
    pub async fn save(&self, run_id: RunId, png: &[u8]) -> Result<SavedScreenshot> {
        fs::create_dir_all(&self.dir).await?;

        let file_name = self.file_name(run_id, Utc::now().timestamp());
        let path = self.dir.join(&file_name);
        fs::write(&path, png).await?;

        let (width, height) = self.dimensions(png);
        info!("Screenshot saved: {} ({}x{})", path.display(), width, height);

        Ok(SavedScreenshot {
            path,
            file_name,
            size_bytes: png.len() as u64,
            width,
            height,
        })
    }

    /// Decoded dimensions, or the fallback when the bytes are not an image
    pub fn dimensions(&self, png: &[u8]) -> (u32, u32) {
        match image::load_from_memory(png) {
            Ok(img) => {
                debug!("Decoded screenshot {}x{}", img.width(), img.height());
                (img.width(), img.height())
            }
            Err(e) => {
                warn!("Could not decode screenshot, using fallback dimensions: {}", e);
                self.fallback_dimensions
            }
        }
    }
}
