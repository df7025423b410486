// Segment Buffer Controller: the single task that owns the cursor, the active
// representation and the append queue.
//
// Fetch completions, sink callbacks, playback events and commands all arrive
// on channels and are applied one at a time, so no state is shared with the
// fetch futures beyond their request metadata.

use crate::config::ControllerConfig;
use crate::error::BufferError;
use crate::events::{ControllerCommand, ControllerEvent, ControllerState, PlaybackEvent};
use crate::fetcher::SegmentDownloader;
use crate::metrics::ControllerMetrics;
use crate::prefetch::PrefetchScheduler;
use crate::pump::{BufferPump, PumpOutcome};
use crate::queue::{AppendQueue, Ticket};
use crate::seek::SeekRecovery;
use crate::segment::{FetchOrigin, FetchedBuffer, RepresentationId, SegmentKind, SegmentRequest};
use crate::sink::{DecodeSink, SinkEvent};
use crate::switch::RepresentationSwitch;
use bytes::Bytes;
use dash::{Manifest, ManifestError};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Receiving ends consumed by [`SegmentBufferController::run`].
pub struct ControllerInputs {
    pub commands: mpsc::Receiver<ControllerCommand>,
    pub playback: mpsc::Receiver<PlaybackEvent>,
    pub sink_events: mpsc::UnboundedReceiver<SinkEvent>,
}

/// Sending ends the controller reports through.
pub struct ControllerOutputs {
    pub state: watch::Sender<ControllerState>,
    pub events: mpsc::Sender<ControllerEvent>,
}

struct FetchOutcome {
    ticket: Ticket,
    request: SegmentRequest,
    result: Result<Bytes, BufferError>,
}

pub struct SegmentBufferController {
    config: ControllerConfig,
    manifest: Arc<Manifest>,
    downloader: Arc<dyn SegmentDownloader>,
    sink: Box<dyn DecodeSink>,
    metrics: Arc<ControllerMetrics>,
    outputs: ControllerOutputs,

    /// Session token; each generation gets a child of it
    token: CancellationToken,
    generation_token: CancellationToken,

    representation: RepresentationId,
    generation: u64,
    cursor: u64,

    queue: AppendQueue,
    pump: BufferPump,
    prefetch: PrefetchScheduler,
    seek: SeekRecovery,
    switcher: RepresentationSwitch,

    /// Reserved fetches waiting for a free concurrency slot, in issue order
    waiting: VecDeque<(Ticket, SegmentRequest)>,
    in_flight: FuturesUnordered<BoxFuture<'static, FetchOutcome>>,
    /// Media indices whose fetch failed, refetched ahead of the cursor
    missed: BTreeSet<u64>,

    init_appended: bool,
    recovery_pending: usize,
    reinit_attempts: u32,
    end_reported: bool,
}

impl SegmentBufferController {
    pub fn new(
        config: ControllerConfig,
        manifest: Arc<Manifest>,
        downloader: Arc<dyn SegmentDownloader>,
        sink: Box<dyn DecodeSink>,
        metrics: Arc<ControllerMetrics>,
        outputs: ControllerOutputs,
        token: CancellationToken,
    ) -> Self {
        let representation = RepresentationId::new(&manifest.default_representation().id);
        let seek = SeekRecovery::new(config.seek.clone());
        Self {
            prefetch: PrefetchScheduler::new(config.prefetch.clone()),
            switcher: RepresentationSwitch::new(config.switch.clone(), seek.clone()),
            seek,
            generation_token: token.child_token(),
            token,
            config,
            manifest,
            downloader,
            sink,
            metrics,
            outputs,
            representation,
            generation: 0,
            cursor: 1,
            queue: AppendQueue::new(),
            pump: BufferPump::new(),
            waiting: VecDeque::new(),
            in_flight: FuturesUnordered::new(),
            missed: BTreeSet::new(),
            init_appended: false,
            recovery_pending: 0,
            reinit_attempts: 0,
            end_reported: false,
        }
    }

    /// Drives the session until cancellation, a shutdown command, or an
    /// unrecoverable sink failure.
    pub async fn run(mut self, inputs: ControllerInputs) -> Result<(), BufferError> {
        let ControllerInputs {
            mut commands,
            mut playback,
            mut sink_events,
        } = inputs;

        let mut ticker = tokio::time::interval(self.config.pump.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let token = self.token.clone();

        self.start();
        self.refresh_state();

        let result = loop {
            let step = tokio::select! {
                biased;

                _ = token.cancelled() => {
                    debug!("Cancellation requested, stopping controller");
                    break Ok(());
                }

                Some(event) = sink_events.recv() => self.on_sink_event(event),

                command = commands.recv() => match command {
                    Some(ControllerCommand::SelectRepresentation(id)) => {
                        if let Err(error) = self.switch_to(id) {
                            warn!(%error, "Ignoring representation selection");
                        }
                        Ok(())
                    }
                    Some(ControllerCommand::Shutdown) | None => {
                        debug!("Shutdown requested, stopping controller");
                        break Ok(());
                    }
                },

                Some(event) = playback.recv() => {
                    self.on_playback(event);
                    Ok(())
                }

                Some(outcome) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.on_fetch_completed(outcome)
                }

                _ = ticker.tick() => self.pump_once(),
            };

            if let Err(error) = step {
                break Err(error);
            }
            self.refresh_state();
        };

        self.generation_token.cancel();
        self.metrics.log_summary();
        result
    }

    fn start(&mut self) {
        let initial = self.representation.clone();
        self.activate(initial, FetchOrigin::Startup);
        for _ in 0..self.config.startup_burst {
            if !self.issue_next_media(FetchOrigin::Startup) {
                break;
            }
        }
    }

    /// Makes `representation` active. Already active is a no-op.
    pub fn switch_to(&mut self, representation: RepresentationId) -> Result<(), BufferError> {
        if !self.manifest.contains(representation.as_str()) {
            return Err(ManifestError::UnknownRepresentation {
                id: representation.to_string(),
            }
            .into());
        }
        if representation == self.representation {
            debug!(representation = %representation, "Representation already active");
            return Ok(());
        }

        self.metrics.record_switch();
        self.reinit_attempts = 0;
        self.activate(representation, FetchOrigin::Switch);
        Ok(())
    }

    /// Starts a new generation for `representation` and fetches its
    /// initialization segment ahead of any media segment.
    fn activate(&mut self, representation: RepresentationId, origin: FetchOrigin) {
        self.generation_token.cancel();
        self.generation_token = self.token.child_token();
        self.generation += 1;

        let purged = self.queue.purge_before(self.generation);
        if purged > 0 {
            debug!(purged, "Dropped queued buffers of the previous generation");
            self.metrics.record_stale_dropped(purged as u64);
        }
        self.waiting.clear();
        self.missed.clear();
        self.recovery_pending = 0;
        self.init_appended = false;
        self.end_reported = false;
        self.prefetch.reset();

        self.representation = representation;
        self.cursor = match origin {
            FetchOrigin::Startup => 1,
            _ => self.switcher.cursor_after_switch(
                &self.manifest,
                self.sink.position(),
                &self.sink.buffered(),
            ),
        };

        info!(
            representation = %self.representation,
            generation = self.generation,
            cursor = self.cursor,
            "Representation activated"
        );
        self.emit(ControllerEvent::RepresentationChanged {
            representation: self.representation.clone(),
            generation: self.generation,
        });

        self.issue(SegmentKind::Init, origin);
    }

    /// Issues the media segment at the cursor. Returns `false` once the
    /// cursor is past the last segment.
    fn issue_next_media(&mut self, origin: FetchOrigin) -> bool {
        let max = self.manifest.max_segment_index;
        if self.cursor > max {
            self.report_end();
            return false;
        }

        let index = self.cursor;
        self.cursor += 1;
        self.issue(SegmentKind::Media(index), origin);

        if self.cursor > max {
            self.report_end();
        }
        true
    }

    /// Reserves a queue slot and starts the fetch, or parks it until a
    /// concurrency slot frees up.
    fn issue(&mut self, kind: SegmentKind, origin: FetchOrigin) {
        let request = SegmentRequest {
            representation: self.representation.clone(),
            kind,
            generation: self.generation,
            origin,
        };
        let ticket = self.queue.reserve(self.generation);
        if origin == FetchOrigin::SeekRecovery {
            self.recovery_pending += 1;
        }

        trace!(
            representation = %request.representation,
            kind = %kind,
            ?origin,
            "Fetch issued"
        );

        if self.in_flight.len() < self.config.max_concurrent_fetches {
            self.spawn_fetch(ticket, request);
        } else {
            self.waiting.push_back((ticket, request));
        }
    }

    fn spawn_fetch(&mut self, ticket: Ticket, request: SegmentRequest) {
        let downloader = Arc::clone(&self.downloader);
        let token = self.generation_token.clone();
        self.in_flight.push(
            async move {
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(BufferError::Cancelled),
                    result = downloader.fetch(&request) => result,
                };
                FetchOutcome {
                    ticket,
                    request,
                    result,
                }
            }
            .boxed(),
        );
    }

    fn fill_free_slots(&mut self) {
        while self.in_flight.len() < self.config.max_concurrent_fetches {
            let Some((ticket, request)) = self.waiting.pop_front() else {
                break;
            };
            self.spawn_fetch(ticket, request);
        }
    }

    fn on_fetch_completed(&mut self, outcome: FetchOutcome) -> Result<(), BufferError> {
        let FetchOutcome {
            ticket,
            request,
            result,
        } = outcome;
        self.fill_free_slots();

        if request.generation != self.generation {
            // Slot already purged by the switch
            self.queue.abandon(ticket);
            match &result {
                Ok(_) => self.metrics.record_stale_dropped(1),
                Err(error) if error.is_cancelled() => self.metrics.record_fetch_cancelled(),
                Err(_) => {}
            }
            trace!(
                kind = %request.kind,
                generation = request.generation,
                "Discarding fetch of a superseded generation"
            );
            return Ok(());
        }

        if request.origin == FetchOrigin::SeekRecovery {
            self.recovery_pending = self.recovery_pending.saturating_sub(1);
        }

        match result {
            Ok(data) => {
                let buffer = FetchedBuffer::from_request(&request, data);
                let bytes = buffer.len();
                if self.queue.fulfill(ticket, buffer) {
                    self.metrics.record_enqueued();
                    debug!(
                        representation = %request.representation,
                        kind = %request.kind,
                        bytes,
                        "Buffer enqueued"
                    );
                    self.emit(ControllerEvent::BufferEnqueued {
                        representation: request.representation,
                        kind: request.kind,
                        bytes,
                    });
                }
                Ok(())
            }
            Err(BufferError::Cancelled) => {
                self.queue.abandon(ticket);
                self.metrics.record_fetch_cancelled();
                Ok(())
            }
            Err(error) => {
                self.queue.abandon(ticket);
                self.metrics.record_fetch_error();
                warn!(
                    representation = %request.representation,
                    kind = %request.kind,
                    %error,
                    "Segment fetch failed"
                );
                self.emit(ControllerEvent::FetchFailed {
                    representation: request.representation.clone(),
                    kind: request.kind,
                    error: error.to_string(),
                });

                match request.kind {
                    SegmentKind::Init => self.reinitialize(error),
                    SegmentKind::Media(index) => {
                        // Segments past the failed one stay in place; only
                        // this index is fetched again
                        self.missed.insert(index);
                        self.prefetch.reset();
                        Ok(())
                    }
                }
            }
        }
    }

    fn on_sink_event(&mut self, event: SinkEvent) -> Result<(), BufferError> {
        match event {
            SinkEvent::AppendCompleted => {
                let Some(info) = self.pump.on_append_completed() else {
                    trace!("Append completion without outstanding append");
                    return Ok(());
                };
                self.metrics.record_appended();
                if info.generation == self.generation {
                    self.reinit_attempts = 0;
                    match info.kind {
                        SegmentKind::Init => self.init_appended = true,
                        SegmentKind::Media(index) => self.prefetch.on_segment_settled(index),
                    }
                }
                self.emit(ControllerEvent::BufferAppended {
                    representation: info.representation,
                    kind: info.kind,
                });
                Ok(())
            }
            SinkEvent::AppendFailed { reason } => {
                let info = self.pump.on_append_failed();
                self.metrics.record_append_failure();
                warn!(kind = ?info.map(|i| i.kind), reason = %reason, "Sink rejected append");
                self.reinitialize(BufferError::sink(reason))
            }
        }
    }

    /// Re-activates the current representation after a sink failure or a
    /// failed initialization fetch. Once the budget is spent the controller
    /// stops with `cause`.
    fn reinitialize(&mut self, cause: BufferError) -> Result<(), BufferError> {
        self.reinit_attempts += 1;
        if self.reinit_attempts > self.config.max_sink_reinit {
            error!(
                representation = %self.representation,
                attempts = self.reinit_attempts,
                error = %cause,
                "Giving up after repeated initialization failures"
            );
            return Err(cause);
        }

        self.metrics.record_sink_reinit();
        self.emit(ControllerEvent::SinkReinitialized {
            representation: self.representation.clone(),
            reason: cause.to_string(),
        });
        let representation = self.representation.clone();
        self.activate(representation, FetchOrigin::Switch);
        Ok(())
    }

    fn on_playback(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::PositionAdvanced { position } => {
                let buffered = self.sink.buffered();
                let next = self.missed.first().copied().unwrap_or(self.cursor);
                let Some(index) = self.prefetch.on_position(
                    position,
                    &buffered,
                    next,
                    self.manifest.max_segment_index,
                ) else {
                    return;
                };

                self.metrics.record_prefetch();
                if self.missed.remove(&index) {
                    debug!(index, "Refetching previously failed segment");
                    self.issue(SegmentKind::Media(index), FetchOrigin::Prefetch);
                } else {
                    self.issue_next_media(FetchOrigin::Prefetch);
                }
            }
            PlaybackEvent::Seeking { position } => {
                let buffered = self.sink.buffered();
                let Some(plan) = self.seek.plan(&self.manifest, position, &buffered) else {
                    return;
                };

                self.prefetch.reset();
                self.missed.clear();
                self.metrics.record_seek_recovery();
                for &index in &plan.indices {
                    self.issue(SegmentKind::Media(index), FetchOrigin::SeekRecovery);
                }
                self.cursor = plan.next_cursor;
                if self.cursor > self.manifest.max_segment_index {
                    self.report_end();
                } else {
                    self.end_reported = false;
                }

                info!(
                    position,
                    cursor = plan.start,
                    count = plan.indices.len(),
                    "Seek recovery issued"
                );
                self.emit(ControllerEvent::SeekRecovered {
                    position,
                    cursor: plan.start,
                    indices: plan.indices,
                });
            }
        }
    }

    fn pump_once(&mut self) -> Result<(), BufferError> {
        match self.pump.tick(&mut self.queue, self.sink.as_mut()) {
            PumpOutcome::Idle | PumpOutcome::Busy | PumpOutcome::Appended(_) => Ok(()),
            PumpOutcome::Rejected { info, error } => {
                self.metrics.record_append_failure();
                warn!(kind = %info.kind, %error, "Sink refused append");
                self.reinitialize(error)
            }
        }
    }

    fn report_end(&mut self) {
        if self.end_reported {
            return;
        }
        self.end_reported = true;
        let last_index = self.manifest.max_segment_index;
        info!(last_index, "All media segments requested");
        self.emit(ControllerEvent::EndOfSegments { last_index });
    }

    fn phase(&self) -> ControllerState {
        if !self.init_appended {
            ControllerState::Switching
        } else if self.recovery_pending > 0 {
            ControllerState::Seeking
        } else {
            ControllerState::Steady
        }
    }

    fn refresh_state(&self) {
        let phase = self.phase();
        self.outputs.state.send_if_modified(|state| {
            if *state == phase {
                return false;
            }
            trace!(from = ?state, to = ?phase, "Controller state changed");
            *state = phase;
            true
        });
    }

    fn emit(&self, event: ControllerEvent) {
        if let Err(TrySendError::Full(event)) = self.outputs.events.try_send(event) {
            trace!(?event, "Event channel full, dropping event");
        }
    }
}
