// Session Coordinator: wires manifest, fetcher, sink and controller together
// and hands out a handle to the running session.

use crate::config::{ControllerConfig, create_client};
use crate::controller::{ControllerInputs, ControllerOutputs, SegmentBufferController};
use crate::error::BufferError;
use crate::events::{ControllerCommand, ControllerEvent, ControllerState, PlaybackEvent};
use crate::fetcher::{SegmentDownloader, SegmentFetcher};
use crate::loader::ManifestLoader;
use crate::metrics::ControllerMetrics;
use crate::segment::RepresentationId;
use crate::sink::{DecodeSink, SinkEvent};
use dash::Manifest;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct SessionCoordinator;

impl SessionCoordinator {
    /// Loads the manifest at `manifest_url`, opens the sink and spawns the
    /// controller task.
    ///
    /// `sink_events` must receive the completion signals of `sink`.
    pub async fn setup_and_spawn(
        manifest_url: &str,
        config: ControllerConfig,
        sink: Box<dyn DecodeSink>,
        sink_events: mpsc::UnboundedReceiver<SinkEvent>,
        token: CancellationToken,
    ) -> Result<ControllerHandle, BufferError> {
        config.validate()?;
        let (state_tx, state_rx) = watch::channel(ControllerState::Uninitialized);
        let client = create_client(&config.fetcher)?;

        state_tx.send_replace(ControllerState::AwaitingManifest);
        let manifest = ManifestLoader::new(
            client.clone(),
            config.retry.clone(),
            config.fetcher.request_timeout,
            token.clone(),
        )
        .load(manifest_url)
        .await?;
        let manifest = Arc::new(manifest);

        let metrics = Arc::new(ControllerMetrics::new());
        let downloader = SegmentFetcher::new(
            client,
            Arc::clone(&manifest),
            config.retry.clone(),
            config.fetcher.request_timeout,
            token.clone(),
        )
        .with_metrics(Arc::clone(&metrics));

        Session {
            config,
            manifest,
            downloader: Arc::new(downloader),
            metrics,
            state: (state_tx, state_rx),
            token,
        }
        .spawn(sink, sink_events)
        .await
    }

    /// Spawns a controller over an already parsed manifest and a custom
    /// downloader.
    pub async fn spawn_with(
        config: ControllerConfig,
        manifest: Arc<Manifest>,
        downloader: Arc<dyn SegmentDownloader>,
        sink: Box<dyn DecodeSink>,
        sink_events: mpsc::UnboundedReceiver<SinkEvent>,
        token: CancellationToken,
    ) -> Result<ControllerHandle, BufferError> {
        config.validate()?;
        Session {
            config,
            manifest,
            downloader,
            metrics: Arc::new(ControllerMetrics::new()),
            state: watch::channel(ControllerState::Uninitialized),
            token,
        }
        .spawn(sink, sink_events)
        .await
    }
}

struct Session {
    config: ControllerConfig,
    manifest: Arc<Manifest>,
    downloader: Arc<dyn SegmentDownloader>,
    metrics: Arc<ControllerMetrics>,
    state: (
        watch::Sender<ControllerState>,
        watch::Receiver<ControllerState>,
    ),
    token: CancellationToken,
}

impl Session {
    async fn spawn(
        self,
        mut sink: Box<dyn DecodeSink>,
        sink_events: mpsc::UnboundedReceiver<SinkEvent>,
    ) -> Result<ControllerHandle, BufferError> {
        let Session {
            config,
            manifest,
            downloader,
            metrics,
            state: (state_tx, state_rx),
            token,
        } = self;

        state_tx.send_replace(ControllerState::AwaitingSinkOpen);
        tokio::select! {
            _ = token.cancelled() => return Err(BufferError::Cancelled),
            opened = sink.open() => opened?,
        }
        sink.add_source(&manifest.mime_type)?;
        debug!(mime_type = %manifest.mime_type, "Sink source added");

        let capacity = config.channel_capacity;
        let (command_tx, command_rx) = mpsc::channel(capacity);
        let (playback_tx, playback_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);

        let representations = manifest
            .representation_ids()
            .map(RepresentationId::new)
            .collect();

        let controller = SegmentBufferController::new(
            config,
            manifest,
            downloader,
            sink,
            Arc::clone(&metrics),
            ControllerOutputs {
                state: state_tx,
                events: event_tx,
            },
            token.clone(),
        );
        let task = tokio::spawn(controller.run(ControllerInputs {
            commands: command_rx,
            playback: playback_rx,
            sink_events,
        }));
        info!("Segment buffer controller started");

        Ok(ControllerHandle {
            commands: command_tx,
            playback: playback_tx,
            events: event_rx,
            state: state_rx,
            representations,
            metrics,
            token,
            task,
        })
    }
}

/// Handle to a running controller session.
///
/// Dropping the handle closes the command channel, which stops the
/// controller.
pub struct ControllerHandle {
    commands: mpsc::Sender<ControllerCommand>,
    playback: mpsc::Sender<PlaybackEvent>,
    events: mpsc::Receiver<ControllerEvent>,
    state: watch::Receiver<ControllerState>,
    representations: Vec<RepresentationId>,
    metrics: Arc<ControllerMetrics>,
    token: CancellationToken,
    task: JoinHandle<Result<(), BufferError>>,
}

impl ControllerHandle {
    /// Representations offered for selection, in manifest order.
    pub fn representations(&self) -> &[RepresentationId] {
        &self.representations
    }

    pub async fn select_representation(
        &self,
        representation: impl Into<RepresentationId>,
    ) -> Result<(), BufferError> {
        self.send_command(ControllerCommand::SelectRepresentation(
            representation.into(),
        ))
        .await
    }

    pub async fn position_advanced(&self, position: f64) -> Result<(), BufferError> {
        self.send_playback(PlaybackEvent::PositionAdvanced { position })
            .await
    }

    pub async fn seeking(&self, position: f64) -> Result<(), BufferError> {
        self.send_playback(PlaybackEvent::Seeking { position }).await
    }

    /// Asks the controller to stop after the current step.
    pub async fn shutdown(&self) -> Result<(), BufferError> {
        self.send_command(ControllerCommand::Shutdown).await
    }

    /// Stops the controller and any in-flight fetches immediately.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ControllerState> {
        self.state.clone()
    }

    pub async fn next_event(&mut self) -> Option<ControllerEvent> {
        self.events.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<ControllerEvent> {
        self.events.try_recv().ok()
    }

    pub fn metrics(&self) -> &Arc<ControllerMetrics> {
        &self.metrics
    }

    /// Waits for the controller task to finish and returns its result.
    pub async fn join(self) -> Result<(), BufferError> {
        self.task
            .await
            .map_err(|e| BufferError::internal(format!("controller task failed: {e}")))?
    }

    async fn send_command(&self, command: ControllerCommand) -> Result<(), BufferError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BufferError::Cancelled)
    }

    async fn send_playback(&self, event: PlaybackEvent) -> Result<(), BufferError> {
        self.playback
            .send(event)
            .await
            .map_err(|_| BufferError::Cancelled)
    }
}
