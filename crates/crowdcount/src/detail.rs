//! Detail panel for the selected row: image, file details, and analytics.
//!
//! Every part degrades on its own. A bad descriptor hides the image but not
//! the chart; a zero-attendee row hides the chart but not the image.

use crate::analytics::{self, Analytics, NOT_AVAILABLE, format_conversion};
use crate::descriptor::{self, FileDescriptor};
use crate::error::{CrowdError, MetadataWarning};
use crate::presign::{PresignResolver, Resolution};
use crate::snapshot::{SessionRecord, Snapshot};
use chrono::{DateTime, Utc};
use std::fmt;

pub const PERMISSION_HINT: &str = "Check permissions for the GET_PRESIGNED_URL function";

#[derive(Debug)]
pub enum ImagePane {
    Image {
        url: String,
        caption: String,
        expires_at: DateTime<Utc>,
    },
    /// The descriptor was usable but no URL could be produced
    UrlUnavailable {
        relative_path: String,
        reason: String,
    },
    /// No usable descriptor; carries what is needed to debug the row
    NoImage {
        columns: Vec<String>,
        raw: Option<String>,
        warning: Option<MetadataWarning>,
    },
}

#[derive(Debug)]
pub struct DetailPanel {
    pub index: usize,
    pub caption: String,
    pub image: ImagePane,
    pub file: Option<Result<FileDescriptor, MetadataWarning>>,
    pub summary: String,
    pub analytics: Result<Analytics, CrowdError>,
}

/// Assemble the panel for row `index`, resolving a fresh presigned URL
pub async fn build_detail(
    snapshot: &Snapshot,
    index: usize,
    resolver: &PresignResolver,
) -> Result<DetailPanel, CrowdError> {
    let record = snapshot.record(index)?;
    let caption = format!("Session: {}", record.caption.as_deref().unwrap_or(""));
    let file = record.file_name.as_ref().map(descriptor::extract);

    let image = match &file {
        Some(Ok(fd)) => {
            match resolver
                .resolve(fd.stage.as_deref(), Some(fd.relative_path.as_str()))
                .await
            {
                Resolution::Resolved { url, expires_at } => ImagePane::Image {
                    url,
                    caption: caption.clone(),
                    expires_at,
                },
                Resolution::Skipped(reason) => ImagePane::UrlUnavailable {
                    relative_path: fd.relative_path.clone(),
                    reason,
                },
                Resolution::Failed(e) => ImagePane::UrlUnavailable {
                    relative_path: fd.relative_path.clone(),
                    reason: e.to_string(),
                },
            }
        }
        Some(Err(warning)) => no_image(snapshot, &record, Some(warning.clone())),
        None => no_image(snapshot, &record, None),
    };

    Ok(DetailPanel {
        index,
        caption,
        image,
        file,
        summary: summary_line(&record),
        analytics: analytics::render(&record),
    })
}

fn no_image(snapshot: &Snapshot, record: &SessionRecord, warning: Option<MetadataWarning>) -> ImagePane {
    ImagePane::NoImage {
        columns: snapshot.columns().iter().map(|c| c.name.clone()).collect(),
        raw: record.file_name.as_ref().map(|raw| raw.as_text()),
        warning,
    }
}

fn summary_line(record: &SessionRecord) -> String {
    format!(
        "Attendees: {} | Raised Hands: {} | Conversion: {}",
        record.total_attendees,
        record.raised_hands,
        format_conversion(record.percentage_with_hands_up)
    )
}

impl fmt::Display for ImagePane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImagePane::Image {
                url,
                caption,
                expires_at,
            } => {
                writeln!(f, "{caption}")?;
                writeln!(f, "Image: {url}")?;
                writeln!(f, "Link expires: {}", expires_at.format("%Y-%m-%d %H:%M UTC"))
            }
            ImagePane::UrlUnavailable {
                relative_path,
                reason,
            } => {
                writeln!(f, "Could not generate presigned URL for: {relative_path}")?;
                writeln!(f, "  {reason}")?;
                writeln!(f, "{PERMISSION_HINT}")
            }
            ImagePane::NoImage {
                columns,
                raw,
                warning,
            } => {
                writeln!(f, "No valid image file found in selected row")?;
                if let Some(warning) = warning {
                    writeln!(f, "Warning: {warning}")?;
                }
                writeln!(f, "Available columns: {}", columns.join(", "))?;
                if let Some(raw) = raw {
                    writeln!(f, "FILE_NAME content: {raw}")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for DetailPanel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "== Row {} ==", self.index)?;
        writeln!(f)?;
        writeln!(f, "-- Session Image --")?;
        write!(f, "{}", self.image)?;

        if let (ImagePane::Image { .. }, Some(file)) = (&self.image, &self.file) {
            writeln!(f)?;
            writeln!(f, "-- File Details --")?;
            match file {
                Ok(fd) => {
                    let content_type = fd.content_type.as_deref().unwrap_or(NOT_AVAILABLE);
                    writeln!(f, "Content Type: {content_type}")?;
                    match fd.size {
                        Some(size) => writeln!(f, "File Size: {size} bytes")?,
                        None => writeln!(f, "File Size: {NOT_AVAILABLE}")?,
                    }
                    let last_modified = fd.last_modified.as_deref().unwrap_or(NOT_AVAILABLE);
                    writeln!(f, "Last Modified: {last_modified}")?;
                    match fd.etag_prefix() {
                        Some(etag) => writeln!(f, "ETag: {etag}...")?,
                        None => writeln!(f, "ETag: {NOT_AVAILABLE}")?,
                    }
                }
                Err(warning) => writeln!(f, "Could not parse file metadata: {warning}")?,
            }
            writeln!(f, "{}", self.summary)?;
        }

        writeln!(f)?;
        writeln!(f, "-- Analytics --")?;
        match &self.analytics {
            Ok(analytics) => {
                write!(f, "{}", analytics.chart.to_text(72))?;
                for metric in analytics.metrics() {
                    writeln!(f, "{metric}")?;
                }
                Ok(())
            }
            Err(e) => writeln!(f, "{e}"),
        }
    }
}
