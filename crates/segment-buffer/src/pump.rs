// Buffer Pump: the single writer to the decode sink.
//
// Polled on a fixed tick. Each tick appends at most one buffer, and only
// when the previous append has been acknowledged through a sink event.

use crate::error::BufferError;
use crate::queue::AppendQueue;
use crate::segment::{RepresentationId, SegmentKind};
use crate::sink::DecodeSink;
use std::time::Instant;
use tracing::{debug, trace};

/// Identity of an append handed to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendInfo {
    pub representation: RepresentationId,
    pub kind: SegmentKind,
    pub generation: u64,
    pub bytes: usize,
}

#[derive(Debug)]
pub enum PumpOutcome {
    /// Nothing ready to append.
    Idle,
    /// An append is outstanding or the sink reports busy.
    Busy,
    Appended(AppendInfo),
    /// The sink refused the append synchronously.
    Rejected {
        info: AppendInfo,
        error: BufferError,
    },
}

#[derive(Debug, Default)]
pub struct BufferPump {
    outstanding: Option<(AppendInfo, Instant)>,
}

impl BufferPump {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&mut self, queue: &mut AppendQueue, sink: &mut dyn DecodeSink) -> PumpOutcome {
        if self.outstanding.is_some() || sink.is_appending() {
            return PumpOutcome::Busy;
        }

        let Some(buffer) = queue.pop_ready() else {
            return PumpOutcome::Idle;
        };

        let info = AppendInfo {
            representation: buffer.representation,
            kind: buffer.kind,
            generation: buffer.generation,
            bytes: buffer.data.len(),
        };

        match sink.append(buffer.data) {
            Ok(()) => {
                trace!(
                    representation = %info.representation,
                    kind = %info.kind,
                    bytes = info.bytes,
                    "Appending buffer to sink"
                );
                self.outstanding = Some((info.clone(), Instant::now()));
                PumpOutcome::Appended(info)
            }
            Err(error) => PumpOutcome::Rejected { info, error },
        }
    }

    /// Clears the outstanding append after the sink acknowledged it.
    pub fn on_append_completed(&mut self) -> Option<AppendInfo> {
        let (info, started) = self.outstanding.take()?;
        debug!(
            kind = %info.kind,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Append completed"
        );
        Some(info)
    }

    pub fn on_append_failed(&mut self) -> Option<AppendInfo> {
        self.outstanding.take().map(|(info, _)| info)
    }

}
