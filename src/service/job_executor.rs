//! One AOI analysis, end to end.
//!
//! The executor never returns an error: every failure is folded into a
//! [`JobOutcome`] so that one AOI cannot affect another. The token debit
//! always precedes the first provider call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::DynamicImage;

use crate::artifacts::{ArtifactError, ArtifactKind, ArtifactStore};
use crate::config::ExecutorConfig;
use crate::detection::{self, ChangeDetector, ChangeReport, DetectionError};
use crate::domain::{
    AnalysisMetadata, Aoi, AoiId, ArtifactRefs, DateWindow, EventBus, FailureReason, JobOutcome,
    MonitoringEvent, NewAnalysisResult, ProcessId, SkipReason, Trigger,
};
use crate::error::MonitorError;
use crate::persistence::Persistence;
use crate::provider::{AcquisitionRequest, ImageProvider};

use super::TokenLedger;

const COMPARISON_MODE: &str = "baseline_vs_current";

/// Encoded outputs of a comparison.
struct Rendered {
    report: ChangeReport,
    current_jpeg: Vec<u8>,
    heatmap_png: Vec<u8>,
}

/// Runs the analysis pipeline for a single AOI.
#[derive(Debug, Clone)]
pub struct JobExecutor {
    store: Arc<dyn Persistence>,
    ledger: TokenLedger,
    provider: Arc<dyn ImageProvider>,
    artifacts: Arc<dyn ArtifactStore>,
    detector: ChangeDetector,
    event_bus: EventBus,
    config: ExecutorConfig,
}

impl JobExecutor {
    /// Creates an executor over its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn Persistence>,
        ledger: TokenLedger,
        provider: Arc<dyn ImageProvider>,
        artifacts: Arc<dyn ArtifactStore>,
        event_bus: EventBus,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            provider,
            artifacts,
            detector: ChangeDetector::default(),
            event_bus,
            config,
        }
    }

    /// Pipeline configuration.
    #[must_use]
    pub const fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Executes one analysis of `aoi_id`.
    ///
    /// `executed_at` is the execution start and the base of every date
    /// window; `process_id` is recorded on the usage transaction and the
    /// result row.
    pub async fn execute(
        &self,
        aoi_id: AoiId,
        trigger: Trigger,
        executed_at: DateTime<Utc>,
        process_id: ProcessId,
    ) -> JobOutcome {
        let aoi = match self.admit(aoi_id, trigger, executed_at).await {
            Ok(aoi) => aoi,
            Err(outcome) => return outcome,
        };

        let reference = process_id.to_string();
        match self
            .ledger
            .debit(aoi.user_id, self.config.tokens_per_analysis, &reference)
            .await
        {
            Ok(entry) => {
                tracing::debug!(%aoi_id, %process_id, balance = entry.new_balance, "token debited");
            }
            Err(MonitorError::InsufficientFunds { balance, .. }) => {
                tracing::info!(%aoi_id, user = %aoi.user_id, balance, "insufficient tokens");
                return JobOutcome::failure(FailureReason::InsufficientFunds);
            }
            Err(e) => return JobOutcome::failure(FailureReason::Persistence(e.to_string())),
        }

        match self.run_pipeline(&aoi, trigger, executed_at, process_id).await {
            Ok(outcome) => outcome,
            Err(reason) => JobOutcome::Failure {
                reason,
                process_id: Some(process_id),
            },
        }
    }

    async fn admit(
        &self,
        aoi_id: AoiId,
        trigger: Trigger,
        now: DateTime<Utc>,
    ) -> Result<Aoi, JobOutcome> {
        let skipped = |reason| JobOutcome::Skipped { reason };
        let aoi = match self.store.load_aoi(aoi_id).await {
            Ok(Some(aoi)) => aoi,
            Ok(None) => return Err(skipped(SkipReason::NotFound)),
            Err(e) => return Err(JobOutcome::failure(FailureReason::Persistence(e.to_string()))),
        };
        if !aoi.is_active {
            return Err(skipped(SkipReason::Deactivated));
        }
        if !aoi.is_eligible() {
            return Err(skipped(SkipReason::NotEligible));
        }
        if trigger.requires_due() && !aoi.is_due(now) {
            return Err(skipped(SkipReason::NotDue));
        }
        Ok(aoi)
    }

    async fn run_pipeline(
        &self,
        aoi: &Aoi,
        trigger: Trigger,
        executed_at: DateTime<Utc>,
        process_id: ProcessId,
    ) -> Result<JobOutcome, FailureReason> {
        let window = DateWindow::centered(executed_at, self.config.current_window_days);
        let request = AcquisitionRequest {
            bbox: aoi.bbox,
            window,
            width: self.config.image_width,
            height: self.config.image_height,
        };
        let current = self
            .provider
            .acquire(&request)
            .await
            .map_err(|e| FailureReason::Acquisition(e.to_string()))?;

        let baseline = self.load_baseline(aoi).await?;
        let rendered = self.compare(baseline, current).await?;
        let report = &rendered.report;

        let stamp = executed_at.format("%Y%m%d_%H%M%S");
        let stem = format!("aoi_{}_{stamp}_{}", aoi.id, process_id.short());
        let after = self
            .save(ArtifactKind::Raw, aoi, &format!("{stem}.jpg"), rendered.current_jpeg)
            .await?;
        let heatmap = self
            .save(
                ArtifactKind::Heatmap,
                aoi,
                &format!("{stem}_heatmap.png"),
                rendered.heatmap_png,
            )
            .await?;

        let result = NewAnalysisResult {
            process_id,
            user_id: aoi.user_id,
            aoi_id: Some(aoi.id),
            change_score: report.score,
            artifacts: ArtifactRefs {
                before: aoi.baseline_reference.clone().unwrap_or_default(),
                after,
                heatmap,
            },
            metadata: AnalysisMetadata {
                comparison_mode: COMPARISON_MODE.to_string(),
                trigger: trigger.to_string(),
                current_window: window,
                baseline_date: aoi.baseline_date,
                quality: report.quality,
                cloud_coverage_pct: report.cloud_coverage_pct,
                usable_area_pct: report.usable_area_pct,
                changed_area_pct: report.changed_area_pct,
                color_shift: report.color_shift,
                structural_change: report.structural_change,
                max_intensity: report.max_intensity,
                width: report.width,
                height: report.height,
                provider: self.provider.name().to_string(),
            },
            tokens_charged: self.config.tokens_per_analysis,
            is_automatic: trigger != Trigger::Force,
            analyzed_at: executed_at,
        };
        let stored = self
            .store
            .insert_result(result)
            .await
            .map_err(|e| FailureReason::Persistence(e.to_string()))?;

        tracing::info!(
            aoi_id = %aoi.id,
            %process_id,
            score = report.score,
            quality = %report.quality,
            usable_area_pct = report.usable_area_pct,
            "analysis stored"
        );
        self.notify_if_significant(aoi.id, report);

        Ok(JobOutcome::Success {
            score: report.score,
            result_id: stored.id,
            process_id,
            quality: report.quality,
        })
    }

    async fn load_baseline(&self, aoi: &Aoi) -> Result<DynamicImage, FailureReason> {
        let Some(reference) = aoi.baseline_reference.as_deref() else {
            return Err(FailureReason::BaselineMissing);
        };
        let bytes = match self.artifacts.load(reference).await {
            Ok(bytes) => bytes,
            Err(ArtifactError::NotFound(_) | ArtifactError::InvalidName(_)) => {
                tracing::warn!(aoi_id = %aoi.id, reference, "baseline artifact missing");
                return Err(FailureReason::BaselineMissing);
            }
            Err(e) => return Err(FailureReason::Persistence(e.to_string())),
        };
        detection::decode(&bytes).map_err(|e| FailureReason::Detection(e.to_string()))
    }

    async fn compare(
        &self,
        baseline: DynamicImage,
        current: DynamicImage,
    ) -> Result<Rendered, FailureReason> {
        let detector = self.detector;
        let rendered = tokio::task::spawn_blocking(move || -> Result<Rendered, DetectionError> {
            let report = detector.compare(&baseline, &current)?;
            let current_jpeg = detection::encode_jpeg(&current)?;
            let heatmap_png = detection::encode_png(&report.heatmap)?;
            Ok(Rendered {
                report,
                current_jpeg,
                heatmap_png,
            })
        })
        .await
        .map_err(|e| FailureReason::Detection(format!("detector task failed: {e}")))?;
        rendered.map_err(|e| FailureReason::Detection(e.to_string()))
    }

    async fn save(
        &self,
        kind: ArtifactKind,
        aoi: &Aoi,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String, FailureReason> {
        self.artifacts
            .save(kind, aoi.user_id, filename, bytes)
            .await
            .map_err(|e| FailureReason::Persistence(e.to_string()))
    }

    fn notify_if_significant(&self, aoi_id: AoiId, report: &ChangeReport) {
        let threshold = self.config.significant_change_threshold;
        if report.score <= threshold || !report.is_authoritative() {
            return;
        }
        tracing::warn!(%aoi_id, score = report.score, threshold, "significant change detected");
        let _ = self.event_bus.publish(MonitoringEvent::SignificantChange {
            aoi_id,
            score: report.score,
            threshold,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{BaselineStatus, QualityFlag, TransactionType, UserId};
    use crate::provider::AcquisitionError;
    use crate::test_support::{Harness, ScriptedProvider, terrain, with_patch};

    const AOI: AoiId = AoiId::new(1);
    const OWNER: UserId = UserId::new(10);

    async fn run(harness: &Harness, trigger: Trigger) -> JobOutcome {
        harness
            .executor
            .execute(AOI, trigger, Utc::now(), ProcessId::new())
            .await
    }

    #[tokio::test]
    async fn identical_scene_succeeds_with_zero_score() {
        let harness = Harness::new(ScriptedProvider::returning(terrain(64, 64))).await;

        let JobOutcome::Success {
            score,
            result_id,
            process_id,
            quality,
        } = run(&harness, Trigger::Sweep).await
        else {
            panic!("expected success");
        };
        assert!(score.abs() < f64::EPSILON);
        assert_eq!(quality, QualityFlag::High);

        let Ok(results) = harness.store.results_for_aoi(AOI, 10).await else {
            panic!("results");
        };
        let Some(result) = results.first() else {
            panic!("one result row");
        };
        assert_eq!(results.len(), 1);
        assert_eq!(result.id, result_id);
        assert_eq!(result.process_id, process_id);
        assert!(result.is_automatic);
        assert_eq!(result.metadata.trigger, "sweep");
        assert_eq!(result.metadata.provider, "scripted");

        let Ok(log) = harness.ledger.history(OWNER, 10).await else {
            panic!("history");
        };
        let usage: Vec<_> = log
            .iter()
            .filter(|t| t.transaction_type == TransactionType::Usage)
            .collect();
        assert_eq!(usage.len(), 1);
        assert_eq!(
            usage.first().and_then(|t| t.reference_id.clone()),
            Some(process_id.to_string())
        );
        // Baseline plus current image plus heatmap.
        assert_eq!(harness.artifacts.len().await, 3);
    }

    #[tokio::test]
    async fn local_change_raises_significant_change_event() {
        let changed = with_patch(&terrain(64, 64), 8, 8, 48, 48, [250, 230, 20]);
        let harness = Harness::new(ScriptedProvider::returning(changed)).await;
        let mut events = harness.event_bus.subscribe();

        let JobOutcome::Success { score, .. } = run(&harness, Trigger::Force).await else {
            panic!("expected success");
        };
        assert!(score > 0.0);

        let Ok(MonitoringEvent::SignificantChange { aoi_id, threshold, .. }) = events.try_recv()
        else {
            panic!("significant change published");
        };
        assert_eq!(aoi_id, AOI);
        assert!(score > threshold);
    }

    #[tokio::test]
    async fn missing_and_inactive_aois_are_skipped_without_charge() {
        let harness = Harness::new(ScriptedProvider::returning(terrain(8, 8))).await;
        let outcome = harness
            .executor
            .execute(AoiId::new(404), Trigger::Force, Utc::now(), ProcessId::new())
            .await;
        assert_eq!(
            outcome,
            JobOutcome::Skipped {
                reason: SkipReason::NotFound
            }
        );

        harness.update_aoi(|aoi| aoi.is_active = false).await;
        assert_eq!(
            run(&harness, Trigger::Force).await,
            JobOutcome::Skipped {
                reason: SkipReason::Deactivated
            }
        );

        harness.update_aoi(|aoi| {
            aoi.is_active = true;
            aoi.baseline_status = BaselineStatus::Processing;
        })
        .await;
        assert_eq!(
            run(&harness, Trigger::Force).await,
            JobOutcome::Skipped {
                reason: SkipReason::NotEligible
            }
        );

        assert_eq!(harness.provider.calls(), 0);
        assert_eq!(harness.balance().await, Harness::STARTING_BALANCE);
    }

    #[tokio::test]
    async fn scheduled_trigger_skips_aoi_that_is_not_due() {
        let harness = Harness::new(ScriptedProvider::returning(terrain(8, 8))).await;
        harness
            .update_aoi(|aoi| aoi.next_run_at = Some(Utc::now() + chrono::Duration::hours(2)))
            .await;

        assert_eq!(
            run(&harness, Trigger::Timer).await,
            JobOutcome::Skipped {
                reason: SkipReason::NotDue
            }
        );
        // Force bypasses the due check.
        assert!(matches!(
            run(&harness, Trigger::Force).await,
            JobOutcome::Success { .. }
        ));
    }

    #[tokio::test]
    async fn empty_balance_fails_before_acquisition() {
        let harness = Harness::new(ScriptedProvider::returning(terrain(8, 8))).await;
        let Ok(_) = harness
            .ledger
            .debit(OWNER, Harness::STARTING_BALANCE, "drain")
            .await
        else {
            panic!("drain balance");
        };

        assert_eq!(
            run(&harness, Trigger::Sweep).await,
            JobOutcome::failure(FailureReason::InsufficientFunds)
        );
        assert_eq!(harness.provider.calls(), 0);
    }

    #[tokio::test]
    async fn acquisition_failure_keeps_the_debit() {
        let harness =
            Harness::new(ScriptedProvider::failing(AcquisitionError::EmptyResult)).await;

        let JobOutcome::Failure {
            reason: FailureReason::Acquisition(_),
            process_id: Some(_),
        } = run(&harness, Trigger::Sweep).await
        else {
            panic!("expected acquisition failure");
        };
        assert_eq!(harness.balance().await, Harness::STARTING_BALANCE - 1);
        let Ok(results) = harness.store.results_for_aoi(AOI, 10).await else {
            panic!("results");
        };
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn missing_baseline_artifact_is_reported() {
        let harness = Harness::new(ScriptedProvider::returning(terrain(8, 8))).await;
        harness
            .update_aoi(|aoi| aoi.baseline_reference = Some("raw/10/gone.jpg".to_string()))
            .await;

        let JobOutcome::Failure { reason, .. } = run(&harness, Trigger::Sweep).await else {
            panic!("expected failure");
        };
        assert_eq!(reason, FailureReason::BaselineMissing);
    }
}
