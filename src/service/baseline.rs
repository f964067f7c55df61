//! Baseline creation: the reference image later analyses compare against.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::artifacts::{ArtifactKind, ArtifactStore};
use crate::config::ExecutorConfig;
use crate::detection;
use crate::domain::{AoiId, BaselineStatus, DateWindow, EventBus, MonitoringEvent};
use crate::error::MonitorError;
use crate::persistence::Persistence;
use crate::provider::{AcquisitionRequest, ImageProvider};

/// Acquires and stores an AOI's baseline. No tokens are charged.
///
/// Status moves `pending|failed|completed -> processing -> completed|failed`.
#[derive(Debug, Clone)]
pub struct BaselineBuilder {
    store: Arc<dyn Persistence>,
    provider: Arc<dyn ImageProvider>,
    artifacts: Arc<dyn ArtifactStore>,
    event_bus: EventBus,
    config: ExecutorConfig,
}

impl BaselineBuilder {
    /// Creates a builder over its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn Persistence>,
        provider: Arc<dyn ImageProvider>,
        artifacts: Arc<dyn ArtifactStore>,
        event_bus: EventBus,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            provider,
            artifacts,
            event_bus,
            config,
        }
    }

    /// Builds the baseline of `aoi_id` from a window centred
    /// `baseline_offset_days` before `now`. Returns the artifact reference.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::AoiNotFound`] or [`MonitorError::NotEligible`]
    /// for a missing or inactive AOI (status untouched). Acquisition,
    /// encoding and storage failures mark the baseline `failed` and are
    /// returned as the corresponding [`MonitorError`].
    pub async fn build(&self, aoi_id: AoiId, now: DateTime<Utc>) -> Result<String, MonitorError> {
        let aoi = self
            .store
            .load_aoi(aoi_id)
            .await?
            .ok_or(MonitorError::AoiNotFound(aoi_id))?;
        if !aoi.is_active {
            return Err(MonitorError::NotEligible(aoi_id, "aoi is inactive".to_string()));
        }

        self.store
            .set_baseline(aoi_id, BaselineStatus::Processing, None, None)
            .await?;
        tracing::info!(%aoi_id, user = %aoi.user_id, "building baseline");

        let window = DateWindow::baseline(
            now,
            self.config.baseline_offset_days,
            self.config.baseline_window_days,
        );
        let request = AcquisitionRequest {
            bbox: aoi.bbox,
            window,
            width: self.config.image_width,
            height: self.config.image_height,
        };

        let stored = async {
            let image = self.provider.acquire(&request).await?;
            let bytes = tokio::task::spawn_blocking(move || detection::encode_jpeg(&image))
                .await
                .map_err(|e| MonitorError::Internal(format!("encoder task failed: {e}")))?
                .map_err(|e| MonitorError::Internal(e.to_string()))?;
            let filename = format!("baseline_aoi_{aoi_id}_{}.jpg", now.format("%Y%m%d_%H%M%S"));
            let reference = self
                .artifacts
                .save(ArtifactKind::Raw, aoi.user_id, &filename, bytes)
                .await?;
            Ok::<_, MonitorError>(reference)
        }
        .await;

        match stored {
            Ok(reference) => {
                self.store
                    .set_baseline(
                        aoi_id,
                        BaselineStatus::Completed,
                        Some(&reference),
                        Some(window.center()),
                    )
                    .await?;
                tracing::info!(%aoi_id, %reference, "baseline stored");
                let _ = self.event_bus.publish(MonitoringEvent::BaselineCreated {
                    aoi_id,
                    reference: reference.clone(),
                    timestamp: Utc::now(),
                });
                Ok(reference)
            }
            Err(e) => {
                self.record_failure(aoi_id, e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Marks the baseline `failed` and announces it.
    pub(crate) async fn record_failure(&self, aoi_id: AoiId, reason: String) {
        tracing::warn!(%aoi_id, %reason, "baseline failed");
        if let Err(e) = self
            .store
            .set_baseline(aoi_id, BaselineStatus::Failed, None, None)
            .await
        {
            tracing::error!(%aoi_id, error = %e, "could not record baseline failure");
        }
        let _ = self.event_bus.publish(MonitoringEvent::BaselineFailed {
            aoi_id,
            reason,
            timestamp: Utc::now(),
        });
    }
}
