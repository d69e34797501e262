use crate::config::{Config, FrameSourceKind};
use crate::sink::{LatestFrame, LogSink};
use rollcall_core::extractor::ExtractorError;
use rollcall_core::registration::{
    enroll_descriptors, register_identity, ReferenceImage, RegistrationError, RegistrationReport,
    RegistrationRequest,
};
use rollcall_core::{
    DescriptorExtractor, FaceExtractor, FrameSource, IdentityStore, LiveLoop, LiveOptions,
    LoopSummary, PresentationSink, Registry, SessionTracker, StopSignal, StoreError,
};
use rollcall_hw::{Camera, DirSourceError, ImageDirSource};
use rollcall_store::SqliteStore;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] rollcall_hw::CameraError),
    #[error("image directory error: {0}")]
    ImageDir(#[from] DirSourceError),
    #[error("model error: {0}")]
    Extractor(#[from] ExtractorError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("registration failed: {0}")]
    Registration(#[from] RegistrationError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Register {
        request: RegistrationRequest,
        reply: oneshot::Sender<Result<RegistrationReport, RegistrationError>>,
    },
    Enroll {
        identity_id: String,
        images: Vec<ReferenceImage>,
        reply: oneshot::Sender<Result<RegistrationReport, RegistrationError>>,
    },
    Reload {
        reply: oneshot::Sender<Result<usize, StoreError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T, E>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, E>>) -> EngineRequest,
    ) -> Result<T, EngineError>
    where
        EngineError: From<E>,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Register a new identity from reference images. Runs between frames.
    pub async fn register(
        &self,
        request: RegistrationRequest,
    ) -> Result<RegistrationReport, EngineError> {
        self.call(|reply| EngineRequest::Register { request, reply })
            .await
    }

    /// Append descriptors from more reference images to an existing identity.
    pub async fn enroll(
        &self,
        identity_id: String,
        images: Vec<ReferenceImage>,
    ) -> Result<RegistrationReport, EngineError> {
        self.call(|reply| EngineRequest::Enroll {
            identity_id,
            images,
            reply,
        })
        .await
    }

    /// Replace the registry with the store's current contents.
    pub async fn reload(&self) -> Result<usize, EngineError> {
        self.call(|reply| EngineRequest::Reload { reply }).await
    }
}

/// State readable without a round trip to the engine thread.
#[derive(Clone)]
pub struct SharedState {
    pub registry: Arc<RwLock<Registry>>,
    pub tracker: Arc<SessionTracker>,
    pub latest: LatestFrame,
    pub stop: StopSignal,
}

/// Registration state the engine thread serves requests against. The
/// extractor is borrowed from the live loop for each request.
struct Engine {
    store: Box<dyn IdentityStore>,
    registry: Arc<RwLock<Registry>>,
}

impl Engine {
    fn handle(&self, extractor: &mut dyn DescriptorExtractor, request: EngineRequest) {
        match request {
            EngineRequest::Register { request, reply } => {
                let result =
                    register_identity(extractor, self.store.as_ref(), &self.registry, request);
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "registration rejected");
                }
                let _ = reply.send(result);
            }
            EngineRequest::Enroll {
                identity_id,
                images,
                reply,
            } => {
                let result = enroll_descriptors(
                    extractor,
                    self.store.as_ref(),
                    &self.registry,
                    &identity_id,
                    &images,
                );
                if let Err(e) = &result {
                    tracing::warn!(identity = %identity_id, error = %e, "enrollment rejected");
                }
                let _ = reply.send(result);
            }
            EngineRequest::Reload { reply } => {
                let _ = reply.send(self.reload());
            }
        }
    }

    fn reload(&self) -> Result<usize, StoreError> {
        let fresh = Registry::load_from(self.store.as_ref())?;
        let count = fresh.len();
        *self.registry.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        tracing::info!(identities = count, "registry reloaded");
        Ok(count)
    }
}

/// Run the live loop, draining pending requests before each frame.
fn run_engine<E: DescriptorExtractor>(
    live: &mut LiveLoop<E>,
    engine: &Engine,
    source: &mut dyn FrameSource,
    sink: &mut dyn PresentationSink,
    rx: &mut mpsc::Receiver<EngineRequest>,
    stop: &StopSignal,
) -> LoopSummary {
    live.run_with(source, sink, stop, |live| {
        while let Ok(request) = rx.try_recv() {
            engine.handle(live.extractor_mut(), request);
        }
    })
}

fn open_source(config: &Config) -> Result<Box<dyn FrameSource + Send>, EngineError> {
    match config.frame_source_kind() {
        FrameSourceKind::Camera(device) => {
            let camera = Camera::open(&device)?.with_warmup(config.warmup_frames);
            tracing::info!(
                device = %device,
                width = camera.width,
                height = camera.height,
                fourcc = ?camera.fourcc,
                "camera opened"
            );
            Ok(Box::new(camera))
        }
        FrameSourceKind::Directory(dir) => Ok(Box::new(ImageDirSource::open(&dir)?)),
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the frame source, loads both ONNX models and the identity store,
/// then runs the live loop until stopped or the source ends. Fails fast at
/// startup if any resource is unavailable. The returned receiver yields the
/// run's summary once the loop has finished.
pub fn spawn_engine(
    config: &Config,
    stop: StopSignal,
) -> Result<(EngineHandle, SharedState, oneshot::Receiver<LoopSummary>), EngineError> {
    let mut source = open_source(config)?;

    let extractor = FaceExtractor::load(&config.model_dir)?;
    tracing::info!(dir = %config.model_dir.display(), "SCRFD and ArcFace models loaded");

    let store = SqliteStore::open(&config.db_path)?;
    let registry = Registry::load_from(&store)?;

    let shared = SharedState {
        registry: Arc::new(RwLock::new(registry)),
        tracker: Arc::new(SessionTracker::new()),
        latest: LatestFrame::default(),
        stop: stop.clone(),
    };
    let mut live = LiveLoop::new(
        extractor,
        shared.registry.clone(),
        shared.tracker.clone(),
        LiveOptions {
            tolerance: config.tolerance,
            mirror: config.mirror,
        },
    );
    let engine = Engine {
        store: Box::new(store),
        registry: shared.registry.clone(),
    };
    let mut sink = LogSink::new(shared.latest.clone());

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);
    let (done_tx, done_rx) = oneshot::channel();

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            let summary =
                run_engine(&mut live, &engine, source.as_mut(), &mut sink, &mut rx, &stop);
            let _ = done_tx.send(summary);
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok((EngineHandle { tx }, shared, done_rx))
}
