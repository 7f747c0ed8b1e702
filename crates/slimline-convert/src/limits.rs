//! Conversion slot pools.
//!
//! # Design
//! - Two independent pools bound concurrent converter runs: one for images, one for
//!   everything else. Acquisition waits; it never rejects.
//! - A permit reports itself in the `conversion_slots_in_use` gauge until dropped.

use std::sync::Arc;

use slimline_telemetry::Metrics;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{ConvertError, ConvertResult};

/// Extensions converted under the image pool. Everything else uses the video pool.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "3fr", "ari", "arw", "cap", "cin", "cr2", "cr3", "crw", "dcr", "dng", "erf", "fff", "iiq",
    "k25", "kdc", "mrw", "nef", "nrw", "orf", "ori", "pef", "psd", "raf", "raw", "rw2", "rwl",
    "sr2", "srf", "srw", "x3f", "avif", "gif", "jpeg", "jpg", "png", "webp", "bmp", "heic",
    "heif", "hif", "insp", "jp2", "jpe", "jxl", "svg", "tif", "tiff",
];

/// Pool a conversion draws its slot from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaClass {
    /// Still images.
    Image,
    /// Videos and anything not recognised as an image.
    Video,
}

impl MediaClass {
    /// Classify by extension (case-insensitive, dot optional).
    #[must_use]
    pub fn for_extension(extension: &str) -> Self {
        let normalised = extension.trim_start_matches('.').to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&normalised.as_str()) {
            Self::Image
        } else {
            Self::Video
        }
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

/// Shared image and video slot pools.
#[derive(Clone)]
pub struct ConversionLimits {
    image: Arc<Semaphore>,
    video: Arc<Semaphore>,
    metrics: Metrics,
}

impl ConversionLimits {
    /// Build pools with the given number of slots each.
    #[must_use]
    pub fn new(image_slots: usize, video_slots: usize, metrics: Metrics) -> Self {
        Self {
            image: Arc::new(Semaphore::new(image_slots)),
            video: Arc::new(Semaphore::new(video_slots)),
            metrics,
        }
    }

    /// Wait for a slot in the pool for `class`.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::SlotsClosed`] if the pool has been closed.
    pub async fn acquire(&self, class: MediaClass) -> ConvertResult<ConversionPermit> {
        let permit = Arc::clone(self.pool(class))
            .acquire_owned()
            .await
            .map_err(|_| ConvertError::SlotsClosed {
                class: class.as_str(),
            })?;
        self.metrics.slot_acquired(class.as_str());
        Ok(ConversionPermit {
            _permit: permit,
            class,
            metrics: self.metrics.clone(),
        })
    }

    /// Slots currently free in the pool for `class`.
    #[must_use]
    pub fn available(&self, class: MediaClass) -> usize {
        self.pool(class).available_permits()
    }

    /// Metrics handle the pools report to.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    const fn pool(&self, class: MediaClass) -> &Arc<Semaphore> {
        match class {
            MediaClass::Image => &self.image,
            MediaClass::Video => &self.video,
        }
    }
}

/// A held conversion slot; released on drop.
pub struct ConversionPermit {
    _permit: OwnedSemaphorePermit,
    class: MediaClass,
    metrics: Metrics,
}

impl ConversionPermit {
    /// Pool the slot belongs to.
    #[must_use]
    pub const fn class(&self) -> MediaClass {
        self.class
    }
}

impl Drop for ConversionPermit {
    fn drop(&mut self) {
        self.metrics.slot_released(self.class.as_str());
    }
}
