//! Media relay
//!
//! Moves one chat attachment to Twitter: resolve the transport file
//! reference, download it, stage it in a temporary file, push it through
//! the chunked upload protocol and attach alt text. Every stage failure
//! aborts the whole relay; no partial media handle is ever returned.

use crate::config::{
    ALT_TEXT_CHAR_LIMIT, DEFAULT_ALT_TEXT, MAX_MEDIA_FILE_SIZE, MEDIA_CHUNK_SIZE,
    MEDIA_STATUS_MAX_POLLS,
};
use crate::error::FlowError;
use crate::transport::{ChatMedia, ChatTransport, MediaKind};
use crate::twitter::{MediaId, ProcessingInfo, ProcessingState, SocialClient, UploadInit};
use crate::utils::{retry_transport_operation, truncate_str};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

/// Stage of the relay pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStage {
    /// File reference to downloadable path
    Resolve,
    /// Fetching the payload
    Download,
    /// Writing the payload to a temporary file
    Stage,
    /// Chunked upload (`INIT`, `APPEND`, `FINALIZE`, `STATUS`)
    Upload,
    /// Alt text attachment
    Metadata,
}

impl fmt::Display for RelayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resolve => "resolve",
            Self::Download => "download",
            Self::Stage => "staging",
            Self::Upload => "upload",
            Self::Metadata => "metadata",
        };
        f.write_str(name)
    }
}

/// A failed relay and the stage it failed in
#[derive(Debug, Error)]
#[error("{stage} failed: {reason}")]
pub struct RelayError {
    /// Failing stage
    pub stage: RelayStage,
    /// Underlying cause
    pub reason: String,
}

impl RelayError {
    fn at(stage: RelayStage, reason: impl fmt::Display) -> Self {
        Self {
            stage,
            reason: reason.to_string(),
        }
    }
}

impl From<RelayError> for FlowError {
    fn from(e: RelayError) -> Self {
        Self::MediaRelayFailed {
            stage: e.stage,
            reason: e.reason,
        }
    }
}

/// MIME type and upload category of an attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaProfile {
    /// MIME type sent with `INIT`
    pub media_type: String,
    /// `tweet_image`, `tweet_gif` or `tweet_video`
    pub category: &'static str,
}

fn category_for_mime(mime: &str) -> &'static str {
    if mime == "image/gif" {
        "tweet_gif"
    } else if mime.starts_with("image/") {
        "tweet_image"
    } else {
        "tweet_video"
    }
}

/// Classify an attachment for the upload API.
#[must_use]
pub fn classify(media: &ChatMedia) -> MediaProfile {
    match media.kind {
        MediaKind::Photo => MediaProfile {
            media_type: "image/jpeg".to_string(),
            category: "tweet_image",
        },
        MediaKind::Animation => MediaProfile {
            media_type: "video/mp4".to_string(),
            category: "tweet_gif",
        },
        MediaKind::Video => MediaProfile {
            media_type: media
                .mime_type
                .clone()
                .unwrap_or_else(|| "video/mp4".to_string()),
            category: "tweet_video",
        },
        MediaKind::Document => {
            let media_type = media
                .mime_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string());
            let category = category_for_mime(&media_type);
            MediaProfile {
                media_type,
                category,
            }
        }
    }
}

/// Relays chat attachments to Twitter. Holds no per-file state.
#[derive(Debug, Clone, Default)]
pub struct MediaRelay {
    staging_dir: Option<PathBuf>,
    max_poll_wait: Option<Duration>,
}

impl MediaRelay {
    /// Relay staging in the system temporary directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage temporary files in `dir`.
    #[must_use]
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// Cap the wait between processing polls.
    #[must_use]
    pub const fn with_max_poll_wait(mut self, wait: Duration) -> Self {
        self.max_poll_wait = Some(wait);
        self
    }

    /// Relay one attachment and return its media handle.
    ///
    /// # Errors
    ///
    /// Returns a `RelayError` naming the failing stage.
    pub async fn relay(
        &self,
        transport: &dyn ChatTransport,
        client: &dyn SocialClient,
        media: &ChatMedia,
        alt_text: Option<&str>,
    ) -> Result<MediaId, RelayError> {
        if let Some(size) = media.file_size.filter(|s| *s > MAX_MEDIA_FILE_SIZE) {
            return Err(RelayError::at(
                RelayStage::Resolve,
                format!("file is {size} bytes, limit is {MAX_MEDIA_FILE_SIZE}"),
            ));
        }

        let remote = retry_transport_operation(|| transport.resolve_file(&media.file_id))
            .await
            .map_err(|e| RelayError::at(RelayStage::Resolve, e))?;
        if remote.size > MAX_MEDIA_FILE_SIZE {
            return Err(RelayError::at(
                RelayStage::Resolve,
                format!("file is {} bytes, limit is {MAX_MEDIA_FILE_SIZE}", remote.size),
            ));
        }

        let payload = retry_transport_operation(|| transport.download_file(&remote.path))
            .await
            .map_err(|e| RelayError::at(RelayStage::Download, e))?;
        debug!(path = %remote.path, size = payload.len(), "Downloaded attachment");

        // Removed when dropped, on every path out of this function.
        let staged = self
            .stage(&payload)
            .await
            .map_err(|e| RelayError::at(RelayStage::Stage, e))?;
        drop(payload);

        let profile = classify(media);
        let media_id = self.upload(client, staged.path(), &profile).await?;

        // Captions may run to 1024 characters, alt text only to 1000.
        let alt = alt_text
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map_or_else(
                || DEFAULT_ALT_TEXT.to_string(),
                |t| truncate_str(t, ALT_TEXT_CHAR_LIMIT),
            );
        client
            .create_metadata(&media_id, &alt)
            .await
            .map_err(|e| RelayError::at(RelayStage::Metadata, e))?;

        info!(%media_id, category = profile.category, "Media relayed");
        Ok(media_id)
    }

    async fn stage(&self, payload: &[u8]) -> std::io::Result<tempfile::NamedTempFile> {
        let staged = match &self.staging_dir {
            Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
            None => tempfile::NamedTempFile::new()?,
        };
        tokio::fs::write(staged.path(), payload).await?;
        Ok(staged)
    }

    async fn upload(
        &self,
        client: &dyn SocialClient,
        path: &Path,
        profile: &MediaProfile,
    ) -> Result<MediaId, RelayError> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(upload_err)?;
        let total_bytes = file.metadata().await.map_err(upload_err)?.len();

        let media_id = client
            .upload_init(&UploadInit {
                total_bytes,
                media_type: profile.media_type.clone(),
                media_category: profile.category.to_string(),
            })
            .await
            .map_err(upload_err)?;

        let mut chunk = vec![0u8; MEDIA_CHUNK_SIZE];
        let mut segment_index = 0u32;
        loop {
            let len = read_chunk(&mut file, &mut chunk)
                .await
                .map_err(upload_err)?;
            if len == 0 {
                break;
            }
            client
                .upload_append(&media_id, segment_index, &chunk[..len])
                .await
                .map_err(upload_err)?;
            segment_index += 1;
        }
        debug!(%media_id, segments = segment_index, total_bytes, "Upload appended");

        let processing = client
            .upload_finalize(&media_id)
            .await
            .map_err(upload_err)?;
        if let Some(info) = processing {
            self.await_processing(client, &media_id, info).await?;
        }
        Ok(media_id)
    }

    async fn await_processing(
        &self,
        client: &dyn SocialClient,
        media_id: &MediaId,
        mut info: ProcessingInfo,
    ) -> Result<(), RelayError> {
        for _ in 0..MEDIA_STATUS_MAX_POLLS {
            match info.state {
                ProcessingState::Succeeded => return Ok(()),
                ProcessingState::Failed => {
                    let reason = info
                        .error
                        .and_then(|e| e.message.or(e.name))
                        .unwrap_or_else(|| "processing failed".to_string());
                    return Err(RelayError::at(RelayStage::Upload, reason));
                }
                ProcessingState::Pending | ProcessingState::InProgress => {
                    let mut wait = Duration::from_secs(info.check_after_secs.unwrap_or(1));
                    if let Some(cap) = self.max_poll_wait {
                        wait = wait.min(cap);
                    }
                    debug!(%media_id, ?wait, "Media still processing");
                    tokio::time::sleep(wait).await;
                    info = client
                        .upload_status(media_id)
                        .await
                        .map_err(|e| RelayError::at(RelayStage::Upload, e))?;
                }
            }
        }
        warn!(%media_id, "Media processing did not finish in time");
        Err(RelayError::at(
            RelayStage::Upload,
            "media processing did not finish in time",
        ))
    }
}

fn upload_err(e: impl fmt::Display) -> RelayError {
    RelayError::at(RelayStage::Upload, e)
}

/// Fill `buf` from `file`, stopping early only at end of file.
async fn read_chunk(file: &mut tokio::fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
