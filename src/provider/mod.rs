//! Imagery providers.
//!
//! An [`ImageProvider`] acquires one image for a bounding box and a date
//! window. The job pipeline depends only on this capability; concrete
//! backends ([`SentinelHubProvider`]) are interchangeable implementations.

pub mod sentinel_hub;

use std::fmt;

use async_trait::async_trait;
use image::DynamicImage;

use crate::domain::{BoundingBox, DateWindow};

pub use sentinel_hub::SentinelHubProvider;

/// Parameters of one acquisition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionRequest {
    /// Area to image, lon/lat order.
    pub bbox: BoundingBox,
    /// Acceptable acquisition dates.
    pub window: DateWindow,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
}

/// Errors that can occur while acquiring imagery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquisitionError {
    /// Transport-level failure.
    #[error("http error: {0}")]
    Http(String),
    /// Provider answered with a non-success status.
    #[error("provider returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },
    /// Request exceeded its time budget.
    #[error("provider request timed out")]
    Timeout,
    /// Provider returned no usable scene for the window.
    #[error("provider returned an empty image")]
    EmptyResult,
    /// Response bytes could not be decoded as an image.
    #[error("could not decode provider image: {0}")]
    Decode(String),
    /// Credentials were rejected or missing.
    #[error("provider authentication failed: {0}")]
    Auth(String),
}

impl AcquisitionError {
    /// Maps a transport error, keeping timeouts distinguishable.
    #[must_use]
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(err.to_string())
        }
    }
}

/// Capability to acquire satellite imagery.
#[async_trait]
pub trait ImageProvider: fmt::Debug + Send + Sync {
    /// Acquires the best image for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionError`] on transport failure, non-success
    /// responses, timeouts, empty scenes or undecodable payloads.
    async fn acquire(&self, request: &AcquisitionRequest)
    -> Result<DynamicImage, AcquisitionError>;

    /// Returns the provider's name for logging and metadata.
    fn name(&self) -> &str;
}
