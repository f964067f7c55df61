//! Fixtures shared by unit tests: AOIs, synthetic scenes, a scripted
//! imagery provider and a fully wired in-memory harness.

#![allow(clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use image::{DynamicImage, Rgb, RgbImage};

use crate::artifacts::{ArtifactKind, ArtifactStore, MemoryArtifactStore};
use crate::config::{ExecutorConfig, SchedulerConfig};
use crate::detection;
use crate::domain::{
    Aoi, AoiId, BaselineStatus, BoundingBox, EventBus, MonitoringFrequency, UserId,
};
use crate::persistence::{InMemoryPersistence, Persistence};
use crate::provider::{AcquisitionError, AcquisitionRequest, ImageProvider};
use crate::service::{BaselineBuilder, JobExecutor, MonitoringOrchestrator, TokenLedger};

pub(crate) fn hours_ago(now: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    now - Duration::hours(hours)
}

/// Weekly AOI with a completed baseline, due one hour ago.
pub(crate) fn completed_aoi(id: i64, user: i64) -> Aoi {
    Aoi {
        id: AoiId::new(id),
        user_id: UserId::new(user),
        name: format!("aoi {id}"),
        bbox: BoundingBox::from_array([34.78, 32.07, 34.80, 32.09]),
        monitoring_frequency: Some(MonitoringFrequency::Weekly),
        next_run_at: Some(hours_ago(Utc::now(), 1)),
        is_active: true,
        baseline_status: BaselineStatus::Completed,
        baseline_reference: Some(format!("raw/{user}/baseline_aoi_{id}.jpg")),
        baseline_date: Some(Utc::now() - Duration::days(365)),
    }
}

/// Dark, saturated, cloud-free scene. Pixel values depend only on the
/// coordinates, so two calls with the same size are identical.
pub(crate) fn terrain(width: u32, height: u32) -> DynamicImage {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (30 + (x * 7 + y * 3) % 40) as u8,
            (70 + (x * 5 + y * 11) % 50) as u8,
            (20 + (x + y) % 20) as u8,
        ])
    });
    DynamicImage::ImageRgb8(img)
}

/// Copy of `base` with a solid rectangle painted over it.
pub(crate) fn with_patch(
    base: &DynamicImage,
    x0: u32,
    y0: u32,
    width: u32,
    height: u32,
    color: [u8; 3],
) -> DynamicImage {
    let mut img = base.to_rgb8();
    let x1 = (x0 + width).min(img.width());
    let y1 = (y0 + height).min(img.height());
    for y in y0..y1 {
        for x in x0..x1 {
            img.put_pixel(x, y, Rgb(color));
        }
    }
    DynamicImage::ImageRgb8(img)
}

/// Provider returning a fixed image or error, optionally after a delay.
#[derive(Debug)]
pub(crate) struct ScriptedProvider {
    response: Result<DynamicImage, AcquisitionError>,
    delay: Option<StdDuration>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub(crate) fn returning(image: DynamicImage) -> Self {
        Self {
            response: Ok(image),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing(error: AcquisitionError) -> Self {
        Self {
            response: Err(error),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: StdDuration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageProvider for ScriptedProvider {
    async fn acquire(
        &self,
        _request: &AcquisitionRequest,
    ) -> Result<DynamicImage, AcquisitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.response.clone()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// In-memory store and artifacts holding AOI 1 (owned by user 10, with a
/// stored 64x64 terrain baseline) and a funded account for user 10.
#[derive(Debug)]
pub(crate) struct Harness {
    pub(crate) store: Arc<InMemoryPersistence>,
    pub(crate) artifacts: Arc<MemoryArtifactStore>,
    pub(crate) provider: Arc<ScriptedProvider>,
    pub(crate) event_bus: EventBus,
    pub(crate) ledger: TokenLedger,
    pub(crate) executor: JobExecutor,
    pub(crate) baselines: BaselineBuilder,
}

impl Harness {
    pub(crate) const STARTING_BALANCE: i64 = 5;
    const AOI: AoiId = AoiId::new(1);
    const OWNER: UserId = UserId::new(10);

    pub(crate) async fn new(provider: ScriptedProvider) -> Self {
        let store = Arc::new(InMemoryPersistence::new());
        store.insert_aoi(completed_aoi(1, 10)).await;
        let Ok(()) = store.open_account(Self::OWNER, Self::STARTING_BALANCE).await else {
            panic!("account opens");
        };

        let artifacts = Arc::new(MemoryArtifactStore::new());
        let Ok(baseline) = detection::encode_png(&terrain(64, 64).to_rgb8()) else {
            panic!("baseline encodes");
        };
        let Ok(_) = artifacts
            .save(ArtifactKind::Raw, Self::OWNER, "baseline_aoi_1.jpg", baseline)
            .await
        else {
            panic!("baseline stored");
        };

        let provider = Arc::new(provider);
        let event_bus = EventBus::new(256);
        let ledger = TokenLedger::new(Arc::clone(&store) as Arc<dyn Persistence>);
        let executor = JobExecutor::new(
            Arc::clone(&store) as Arc<dyn Persistence>,
            ledger.clone(),
            Arc::clone(&provider) as Arc<dyn ImageProvider>,
            Arc::clone(&artifacts) as Arc<dyn ArtifactStore>,
            event_bus.clone(),
            ExecutorConfig::default(),
        );
        let baselines = BaselineBuilder::new(
            Arc::clone(&store) as Arc<dyn Persistence>,
            Arc::clone(&provider) as Arc<dyn ImageProvider>,
            Arc::clone(&artifacts) as Arc<dyn ArtifactStore>,
            event_bus.clone(),
            ExecutorConfig::default(),
        );

        Self {
            store,
            artifacts,
            provider,
            event_bus,
            ledger,
            executor,
            baselines,
        }
    }

    /// Orchestrator over the same store, artifacts, provider and bus.
    pub(crate) fn orchestrator(
        &self,
        scheduler: SchedulerConfig,
        refund_on_failure: bool,
    ) -> Arc<MonitoringOrchestrator> {
        let executor = ExecutorConfig {
            refund_on_failure,
            ..ExecutorConfig::default()
        };
        Arc::new(MonitoringOrchestrator::new(
            Arc::clone(&self.store) as Arc<dyn Persistence>,
            Arc::clone(&self.provider) as Arc<dyn ImageProvider>,
            Arc::clone(&self.artifacts) as Arc<dyn ArtifactStore>,
            self.event_bus.clone(),
            scheduler,
            executor,
        ))
    }

    pub(crate) async fn aoi(&self) -> Aoi {
        let Ok(Some(aoi)) = self.store.load_aoi(Self::AOI).await else {
            panic!("aoi 1 exists");
        };
        aoi
    }

    pub(crate) async fn update_aoi(&self, change: impl FnOnce(&mut Aoi)) {
        let mut aoi = self.aoi().await;
        change(&mut aoi);
        self.store.insert_aoi(aoi).await;
    }

    pub(crate) async fn balance(&self) -> i64 {
        let Ok(account) = self.ledger.account(Self::OWNER).await else {
            panic!("account exists");
        };
        account.balance
    }
}
