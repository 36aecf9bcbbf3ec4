//! Debug capture: writes every received message body to disk.
//!
//! Files land in hourly UTC buckets:
//!
//! ```text
//! {root}/{yy_MM_dd_HH}/{type}_{subtype}_{sequence}.json
//! ```
//!
//! Sequence numbers restart with the broker channel, so an existing file is
//! never replaced: the copy goes to `{type}_{subtype}_{sequence}_{n}.json`
//! with the first free `n` instead.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::Config;
use crate::queue::WebhookEnvelope;

/// Bucket directory name format.
const BUCKET_FORMAT: &str = "%y_%m_%d_%H";

#[derive(Debug, Clone, Default)]
pub struct DebugCapture {
    root: Option<PathBuf>,
}

impl DebugCapture {
    pub fn disabled() -> Self {
        Self { root: None }
    }

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// Enabled only when the toggle is on and a path is configured.
    pub fn from_config(config: &Config) -> Self {
        match (config.debug_output, &config.debug_output_path) {
            (true, Some(path)) => Self::new(path),
            _ => Self::disabled(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.root.is_some()
    }

    /// Write `body` for this envelope. Returns the file written, if enabled.
    pub async fn write(
        &self,
        envelope: &WebhookEnvelope,
        sequence: u64,
        body: &[u8],
    ) -> io::Result<Option<PathBuf>> {
        self.write_at(Utc::now(), envelope, sequence, body).await
    }

    pub async fn write_at(
        &self,
        now: DateTime<Utc>,
        envelope: &WebhookEnvelope,
        sequence: u64,
        body: &[u8],
    ) -> io::Result<Option<PathBuf>> {
        let Some(root) = &self.root else {
            return Ok(None);
        };

        let mut attempt = 0;
        let path = loop {
            let path = capture_path(root, now, envelope, sequence, attempt);
            if attempt == 0 {
                if let Some(dir) = path.parent() {
                    fs::create_dir_all(dir).await?;
                }
            }

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(body).await?;
                    file.flush().await?;
                    break path;
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    warn!(
                        sequence = sequence,
                        path = %path.display(),
                        "debug_capture_name_taken"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        debug!(
            sequence = sequence,
            path = %path.display(),
            bytes = body.len(),
            "debug_capture_written"
        );

        Ok(Some(path))
    }
}

fn capture_path(
    root: &Path,
    now: DateTime<Utc>,
    envelope: &WebhookEnvelope,
    sequence: u64,
    attempt: u32,
) -> PathBuf {
    let mut file_name = format!(
        "{}_{}_{}",
        file_safe(&envelope.kind),
        file_safe(&envelope.subtype),
        sequence
    );
    if attempt > 0 {
        file_name.push_str(&format!("_{}", attempt));
    }
    file_name.push_str(".json");

    root.join(now.format(BUCKET_FORMAT).to_string()).join(file_name)
}

/// Type and subtype are caller-supplied; keep them inside one path segment.
fn file_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
