//! File resolution seam.

use std::fs::File;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::types::{FileDescriptor, TransferRequest};

/// Errors resolving a request's source locator into a readable file.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("source not found: {0}")]
    NotFound(String),

    #[error("source unreadable: {0}")]
    Unreadable(#[from] io::Error),

    #[error("invalid source locator: {0}")]
    InvalidLocator(String),
}

/// Resolves a [`TransferRequest`] into a readable [`FileDescriptor`].
///
/// Implemented by the embedder; called once per enqueue, before any network
/// operation. A resolution failure terminates the request without touching
/// the connection.
pub trait FileResolver: Send + Sync {
    fn resolve(&self, request: &TransferRequest) -> Result<FileDescriptor, ResolveError>;
}

/// Resolver for embedders whose source locators are plain filesystem paths.
#[derive(Debug, Default)]
pub struct PathResolver;

impl FileResolver for PathResolver {
    fn resolve(&self, request: &TransferRequest) -> Result<FileDescriptor, ResolveError> {
        let path = Path::new(&request.source);
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ResolveError::InvalidLocator(request.source.clone()))?
            .to_string();

        if !path.is_file() {
            return Err(ResolveError::NotFound(request.source.clone()));
        }
        let length = path.metadata()?.len();
        let stream = File::open(path)?;

        let mime_type = mime_for_extension(path.extension().and_then(|e| e.to_str()));
        debug!(file = %name, bytes = length, mime = mime_type, "resolved source path");

        Ok(FileDescriptor {
            name,
            length,
            mime_type: mime_type.to_string(),
            stream: Box::new(stream),
        })
    }
}

/// The handful of types object-push peers commonly accept; everything else
/// goes out as an opaque byte stream.
fn mime_for_extension(extension: Option<&str>) -> &'static str {
    match extension.map(str::to_ascii_lowercase).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/x-wav",
        Some("mp4") => "video/mp4",
        Some("3gp") => "video/3gpp",
        Some("txt") => "text/plain",
        Some("vcf") => "text/x-vcard",
        Some("vcs") => "text/x-vcalendar",
        _ => "application/octet-stream",
    }
}
