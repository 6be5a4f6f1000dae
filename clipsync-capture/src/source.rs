//! Clipboard source seam.

use crate::{CaptureError, CaptureResult};

/// One clipboard observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardRead {
    pub content: Vec<u8>,
    /// MIME type, e.g. `text/plain`.
    pub content_type: String,
}

impl ClipboardRead {
    pub fn text(content: Vec<u8>) -> Self {
        Self {
            content,
            content_type: clipsync_types::TEXT_PLAIN.to_string(),
        }
    }
}

/// Something the monitor can poll for clipboard content.
///
/// Implemented by [`SystemClipboard`] for the OS clipboard and by
/// scripted fakes in tests.
pub trait ClipboardSource: Send + 'static {
    /// Reads the current clipboard content, `None` when the clipboard is
    /// empty or holds nothing this source understands.
    fn read(&mut self) -> CaptureResult<Option<ClipboardRead>>;
}

/// OS clipboard backend over `arboard`. Text only; richer content is a
/// matter for other `ClipboardSource` implementations.
#[cfg(feature = "os-clipboard")]
pub struct SystemClipboard {
    inner: arboard::Clipboard,
}

#[cfg(feature = "os-clipboard")]
impl SystemClipboard {
    pub fn new() -> CaptureResult<Self> {
        let inner = arboard::Clipboard::new().map_err(|e| CaptureError::Source(e.to_string()))?;
        Ok(Self { inner })
    }
}

#[cfg(feature = "os-clipboard")]
impl ClipboardSource for SystemClipboard {
    fn read(&mut self) -> CaptureResult<Option<ClipboardRead>> {
        match self.inner.get_text() {
            Ok(text) if text.is_empty() => Ok(None),
            Ok(text) => Ok(Some(ClipboardRead {
                content: text.into_bytes(),
                content_type: clipsync_types::TEXT_PLAIN.to_string(),
            })),
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(e) => Err(CaptureError::Source(e.to_string())),
        }
    }
}
