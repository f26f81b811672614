use streaming::task::FetchError;
use thiserror::Error;

/// Failure while compositing or annotating a frame.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to encode frame: {0}")]
    Encode(#[source] image::ImageError),

    #[error("overlay request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("overlay unavailable: {0}")]
    Overlay(String),

    #[error("invalid label font: {0}")]
    Font(String),

    #[error("branding logos requested but none are configured")]
    MissingLogos,

    #[error("invalid date format {0:?}")]
    DateFormat(String),

    #[error("invalid frame size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
}

impl ComposeError {
    pub(crate) fn decode(what: &'static str) -> impl FnOnce(image::ImageError) -> Self {
        move |source| ComposeError::Decode { what, source }
    }
}

/// Why a timelapse frame could not be produced.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame cancelled")]
    Cancelled,

    #[error(transparent)]
    Fetch(FetchError),

    #[error(transparent)]
    Compose(#[from] ComposeError),
}

impl From<FetchError> for FrameError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Cancelled => FrameError::Cancelled,
            other => FrameError::Fetch(other),
        }
    }
}
