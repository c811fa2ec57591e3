//! Off-thread engine invocation.
//!
//! `Controller` keeps the `Pipeline` on the calling task and runs each
//! engine call on `tokio::task::spawn_blocking`. Results come back over an
//! mpsc channel tagged with the pipeline generation they were computed
//! for; `apply_next` commits them only when the job was not cancelled and
//! no newer image has been loaded since.

use image::RgbaImage;
use log::{debug, warn};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{RemovalError, Result, UpscaleError};
use crate::pipeline::{JobInput, Pipeline};
use crate::raster::RasterImage;
use crate::removal::{BackgroundRemover, RemovalConfig};
use crate::resample::upscale_preserving_alpha;
use crate::upscale::{SuperResolution, UpscaleMode};

pub type SharedRemover = Arc<dyn BackgroundRemover + Send + Sync>;
pub type SharedUpscaler = Arc<dyn SuperResolution + Send + Sync>;

/// Cooperative cancellation flag shared between a ticket and its job
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Removal,
    Upscale,
}

/// Handle for a submitted engine job
#[derive(Debug, Clone)]
pub struct JobTicket {
    pub id: u64,
    pub kind: JobKind,
    pub generation: u64,
    token: CancelToken,
}

impl JobTicket {
    /// The engine keeps running; its result is dropped on arrival
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

/// What happened to a finished job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Committed { id: u64, kind: JobKind },
    Cancelled { id: u64, kind: JobKind },
    /// Computed for an image that has since been replaced
    Stale { id: u64, kind: JobKind },
}

enum JobOutput {
    Removal(std::result::Result<RgbaImage, RemovalError>),
    /// Carries its input so the commit can check `working` is unchanged
    Upscale(JobInput, std::result::Result<RasterImage, UpscaleError>),
}

struct JobResult {
    id: u64,
    generation: u64,
    output: JobOutput,
}

pub struct Controller {
    pipeline: Pipeline,
    remover: SharedRemover,
    upscaler: SharedUpscaler,
    next_id: u64,
    in_flight: HashMap<u64, CancelToken>,
    tx: mpsc::UnboundedSender<JobResult>,
    rx: mpsc::UnboundedReceiver<JobResult>,
}

impl Controller {
    pub fn new(pipeline: Pipeline, remover: SharedRemover, upscaler: SharedUpscaler) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            pipeline,
            remover,
            upscaler,
            next_id: 1,
            in_flight: HashMap::new(),
            tx,
            rx,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    pub fn into_pipeline(self) -> Pipeline {
        self.pipeline
    }

    /// Jobs submitted but not yet applied
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    /// Cancel every in-flight job
    pub fn cancel_all(&self) {
        for token in self.in_flight.values() {
            token.cancel();
        }
    }

    /// Load a new source; anything still running for the old one is cancelled
    pub fn load_path(&mut self, path: &Path) -> Result<()> {
        self.pipeline.load_path(path)?;
        self.cancel_all();
        Ok(())
    }

    fn ticket(&mut self, kind: JobKind, generation: u64) -> JobTicket {
        let id = self.next_id;
        self.next_id += 1;
        let token = CancelToken::default();
        self.in_flight.insert(id, token.clone());
        JobTicket {
            id,
            kind,
            generation,
            token,
        }
    }

    /// Start background removal on a blocking worker
    pub fn submit_removal(&mut self, config: RemovalConfig) -> Result<JobTicket> {
        let input = self.pipeline.removal_input()?;
        let ticket = self.ticket(JobKind::Removal, input.generation);
        let config = config.effective();
        let remover = Arc::clone(&self.remover);
        let tx = self.tx.clone();
        let (id, generation) = (ticket.id, ticket.generation);
        debug!("Submitting removal job {} for generation {}", id, generation);

        let handle =
            tokio::task::spawn_blocking(move || remover.remove(&input.image.to_rgba8(), &config));
        tokio::spawn(async move {
            let output = handle
                .await
                .unwrap_or_else(|e| Err(RemovalError(format!("Task join error: {}", e))));
            let _ = tx.send(JobResult {
                id,
                generation,
                output: JobOutput::Removal(output),
            });
        });

        Ok(ticket)
    }

    /// Start an upscale on a blocking worker. `UpscaleMode::None` submits nothing.
    pub fn submit_upscale(&mut self, mode: UpscaleMode) -> Result<Option<JobTicket>> {
        let input = self.pipeline.upscale_input()?;
        if mode == UpscaleMode::None {
            return Ok(None);
        }
        let ticket = self.ticket(JobKind::Upscale, input.generation);
        let upscaler = Arc::clone(&self.upscaler);
        let tx = self.tx.clone();
        let (id, generation) = (ticket.id, ticket.generation);
        debug!("Submitting upscale job {} for generation {}", id, generation);

        let source = input.clone();
        let handle = tokio::task::spawn_blocking(move || {
            upscale_preserving_alpha(&input.image, upscaler.as_ref())
        });
        tokio::spawn(async move {
            let output = handle.await.unwrap_or_else(|e| {
                Err(UpscaleError::RuntimeFailure(format!("Task join error: {}", e)))
            });
            let _ = tx.send(JobResult {
                id,
                generation,
                output: JobOutput::Upscale(source, output),
            });
        });

        Ok(Some(ticket))
    }

    /// Wait for the next finished job and apply it. `None` when nothing is
    /// in flight. Engine failures are returned as errors and leave the
    /// pipeline unchanged.
    pub async fn apply_next(&mut self) -> Option<Result<JobOutcome>> {
        if self.in_flight.is_empty() {
            return None;
        }
        let result = self.rx.recv().await?;
        Some(self.apply(result))
    }

    /// Apply every in-flight job in completion order
    pub async fn drain(&mut self) -> Vec<Result<JobOutcome>> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.apply_next().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    fn apply(&mut self, result: JobResult) -> Result<JobOutcome> {
        let id = result.id;
        let token = self.in_flight.remove(&id).unwrap_or_default();
        let kind = match result.output {
            JobOutput::Removal(_) => JobKind::Removal,
            JobOutput::Upscale(..) => JobKind::Upscale,
        };

        if token.is_cancelled() {
            warn!("Job {} ({:?}) was cancelled; result dropped", id, kind);
            return Ok(JobOutcome::Cancelled { id, kind });
        }
        if result.generation != self.pipeline.state().generation() {
            warn!(
                "Job {} ({:?}) finished for generation {} but current is {}; result dropped",
                id,
                kind,
                result.generation,
                self.pipeline.state().generation()
            );
            return Ok(JobOutcome::Stale { id, kind });
        }

        let committed = match result.output {
            JobOutput::Removal(Ok(cutout)) => self
                .pipeline
                .commit_removal(result.generation, RasterImage::Rgba(cutout)),
            JobOutput::Upscale(source, Ok(upscaled)) => {
                self.pipeline.commit_upscale(&source, upscaled)
            }
            JobOutput::Removal(Err(e)) => return self.pipeline.fail("Removal failed.", e),
            JobOutput::Upscale(_, Err(e)) => return self.pipeline.fail("Upscaling failed.", e),
        };

        if committed {
            Ok(JobOutcome::Committed { id, kind })
        } else {
            Ok(JobOutcome::Stale { id, kind })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FluxisError;
    use crate::pipeline::Stage;
    use crate::upscale::{LanczosUpscaler, RgbTensor};
    use image::Rgba;
    use std::sync::mpsc as std_mpsc;
    use std::sync::Mutex;

    /// Makes the left column transparent
    struct ColumnCutter;

    type RemovalResult = std::result::Result<RgbaImage, RemovalError>;

    impl BackgroundRemover for ColumnCutter {
        fn remove(&self, image: &RgbaImage, _: &RemovalConfig) -> RemovalResult {
            let mut out = image.clone();
            for y in 0..out.height() {
                out.get_pixel_mut(0, y)[3] = 0;
            }
            Ok(out)
        }
    }

    /// Blocks until released so tests can interleave a new load
    struct GatedCutter {
        gate: Mutex<std_mpsc::Receiver<()>>,
    }

    impl BackgroundRemover for GatedCutter {
        fn remove(&self, image: &RgbaImage, config: &RemovalConfig) -> RemovalResult {
            let gate = self.gate.lock().map_err(|e| RemovalError(e.to_string()))?;
            let _ = gate.recv();
            ColumnCutter.remove(image, config)
        }
    }

    struct FailingCutter;

    impl BackgroundRemover for FailingCutter {
        fn remove(&self, _: &RgbaImage, _: &RemovalConfig) -> RemovalResult {
            Err(RemovalError("model crashed".to_string()))
        }
    }

    /// Upscaler counterpart of `GatedCutter`
    struct GatedModel {
        gate: Mutex<std_mpsc::Receiver<()>>,
    }

    impl SuperResolution for GatedModel {
        fn upscale2x(&self, input: &RgbTensor) -> std::result::Result<RgbTensor, UpscaleError> {
            let gate = self
                .gate
                .lock()
                .map_err(|e| UpscaleError::RuntimeFailure(e.to_string()))?;
            let _ = gate.recv();
            LanczosUpscaler.upscale2x(input)
        }
    }

    struct PanickingModel;

    impl SuperResolution for PanickingModel {
        fn upscale2x(&self, _: &RgbTensor) -> std::result::Result<RgbTensor, UpscaleError> {
            panic!("engine exploded");
        }
    }

    fn image(width: u32, height: u32) -> RasterImage {
        RasterImage::from(RgbaImage::from_pixel(width, height, Rgba([30, 60, 90, 255])))
    }

    fn controller(remover: SharedRemover, upscaler: SharedUpscaler) -> Controller {
        let mut pipeline = Pipeline::new(64, 64);
        pipeline.load(image(4, 4));
        Controller::new(pipeline, remover, upscaler)
    }

    #[tokio::test]
    async fn test_removal_job_commits() {
        let mut ctl = controller(Arc::new(ColumnCutter), Arc::new(LanczosUpscaler));
        let ticket = ctl.submit_removal(RemovalConfig::default()).unwrap();
        assert_eq!(ctl.pending(), 1);

        let outcome = ctl.apply_next().await.unwrap().unwrap();
        assert_eq!(outcome, JobOutcome::Committed { id: ticket.id, kind: JobKind::Removal });
        assert_eq!(ctl.pipeline().stage(), Stage::BackgroundRemoved);
        assert_eq!(ctl.pipeline().state().working().unwrap().to_rgba8().get_pixel(0, 0)[3], 0);
        assert!(ctl.apply_next().await.is_none());
    }

    #[tokio::test]
    async fn test_upscale_job_commits() {
        let mut ctl = controller(Arc::new(ColumnCutter), Arc::new(LanczosUpscaler));
        let ticket = ctl.submit_upscale(UpscaleMode::SuperResolution2x).unwrap().unwrap();
        let outcome = ctl.apply_next().await.unwrap().unwrap();
        assert_eq!(outcome, JobOutcome::Committed { id: ticket.id, kind: JobKind::Upscale });
        assert_eq!(ctl.pipeline().state().working().unwrap().dimensions(), (8, 8));
    }

    #[tokio::test]
    async fn test_no_upscale_submits_nothing() {
        let mut ctl = controller(Arc::new(ColumnCutter), Arc::new(LanczosUpscaler));
        assert!(ctl.submit_upscale(UpscaleMode::None).unwrap().is_none());
        assert_eq!(ctl.pending(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_job_is_dropped() {
        let mut ctl = controller(Arc::new(ColumnCutter), Arc::new(LanczosUpscaler));
        let ticket = ctl.submit_removal(RemovalConfig::default()).unwrap();
        ticket.cancel();

        let outcome = ctl.apply_next().await.unwrap().unwrap();
        assert_eq!(outcome, JobOutcome::Cancelled { id: ticket.id, kind: JobKind::Removal });
        assert_eq!(ctl.pipeline().stage(), Stage::Loaded);
    }

    #[tokio::test]
    async fn test_result_for_superseded_image_is_stale() {
        let (release, gate) = std_mpsc::channel();
        let remover = Arc::new(GatedCutter { gate: Mutex::new(gate) });
        let mut ctl = controller(remover, Arc::new(LanczosUpscaler));

        let ticket = ctl.submit_removal(RemovalConfig::default()).unwrap();
        ctl.pipeline_mut().load(image(2, 2));
        release.send(()).unwrap();

        let outcome = ctl.apply_next().await.unwrap().unwrap();
        assert_eq!(outcome, JobOutcome::Stale { id: ticket.id, kind: JobKind::Removal });
        assert_eq!(ctl.pipeline().stage(), Stage::Loaded);
        assert_eq!(ctl.pipeline().state().working().unwrap().dimensions(), (2, 2));
    }

    #[tokio::test]
    async fn test_upscale_of_superseded_cutout_is_stale() {
        let (release, gate) = std_mpsc::channel();
        let upscaler = Arc::new(GatedModel { gate: Mutex::new(gate) });
        let mut ctl = controller(Arc::new(ColumnCutter), upscaler);

        let ticket = ctl.submit_upscale(UpscaleMode::SuperResolution2x).unwrap().unwrap();
        ctl.submit_removal(RemovalConfig::default()).unwrap();
        let removal = ctl.apply_next().await.unwrap().unwrap();
        assert!(matches!(removal, JobOutcome::Committed { kind: JobKind::Removal, .. }));
        release.send(()).unwrap();

        let outcome = ctl.apply_next().await.unwrap().unwrap();
        assert_eq!(outcome, JobOutcome::Stale { id: ticket.id, kind: JobKind::Upscale });
        let working = ctl.pipeline().state().working().unwrap();
        assert_eq!(working.dimensions(), (4, 4));
        assert_eq!(working.to_rgba8().get_pixel(0, 0)[3], 0);
        assert_eq!(ctl.pipeline().stage(), Stage::BackgroundRemoved);
    }

    #[tokio::test]
    async fn test_load_path_cancels_in_flight_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("next.png");
        image(2, 2).to_dynamic().save(&path).unwrap();

        let (release, gate) = std_mpsc::channel();
        let remover = Arc::new(GatedCutter { gate: Mutex::new(gate) });
        let mut ctl = controller(remover, Arc::new(LanczosUpscaler));

        let ticket = ctl.submit_removal(RemovalConfig::default()).unwrap();
        ctl.load_path(&path).unwrap();
        release.send(()).unwrap();

        let outcome = ctl.apply_next().await.unwrap().unwrap();
        assert_eq!(outcome, JobOutcome::Cancelled { id: ticket.id, kind: JobKind::Removal });
        assert_eq!(ctl.pipeline().stage(), Stage::Loaded);
        assert_eq!(ctl.pipeline().state().working().unwrap().dimensions(), (2, 2));
        assert_eq!(ctl.pending(), 0);
    }

    #[tokio::test]
    async fn test_engine_failure_is_reported() {
        let mut ctl = controller(Arc::new(FailingCutter), Arc::new(LanczosUpscaler));
        ctl.submit_removal(RemovalConfig::default()).unwrap();
        let err = ctl.apply_next().await.unwrap().unwrap_err();
        assert!(matches!(err, FluxisError::Removal(_)));
        assert_eq!(ctl.pipeline().stage(), Stage::Loaded);
    }

    #[tokio::test]
    async fn test_panicking_engine_becomes_runtime_failure() {
        let mut ctl = controller(Arc::new(ColumnCutter), Arc::new(PanickingModel));
        ctl.submit_upscale(UpscaleMode::SuperResolution2x).unwrap();
        let err = ctl.apply_next().await.unwrap().unwrap_err();
        assert!(matches!(err, FluxisError::Upscale(UpscaleError::RuntimeFailure(_))));
        assert_eq!(ctl.pipeline().state().working().unwrap().dimensions(), (4, 4));
    }

    #[tokio::test]
    async fn test_drain_applies_in_completion_order() {
        let mut ctl = controller(Arc::new(ColumnCutter), Arc::new(LanczosUpscaler));
        ctl.submit_removal(RemovalConfig::default()).unwrap();
        let outcomes = ctl.drain().await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_ok());
        assert_eq!(ctl.pending(), 0);
    }
}
