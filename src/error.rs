//! Renderer error types.

use crate::backend::BackendError;
use thiserror::Error;

/// Errors surfaced by renderer construction and the few fallible renderer
/// operations. Per-frame work never returns these; it logs and falls back.
#[derive(Error, Debug)]
pub enum RendererError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("unknown shader: {0}")]
    UnknownShader(String),
    #[error("a screenshot is already being saved")]
    ScreenshotInFlight,
    #[error("image encoding failed: {0}")]
    ImageEncode(String),
    #[error("window error: {0}")]
    Window(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RendererResult<T> = Result<T, RendererError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RendererError::UnknownShader("pbr_glass".to_string());
        assert_eq!(err.to_string(), "unknown shader: pbr_glass");

        let err: RendererError = BackendError::OutOfMemory.into();
        assert_eq!(err.to_string(), "backend error: Out of memory");
    }
}
