//! Push-mode `stream`: acquire the stream's pull lock, verify no live
//! buffer already owns it, then relay packets from the source into the
//! shared page store until the source ends, the stream is deactivated, or
//! the buffer shuts down.

use thiserror::Error;
use tracing::{info, warn};
use utils::semaphore::NamedSemaphore;

use crate::cache::{CacheError, PageWriter};
use crate::source::PacketSource;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("pull lock already held for this stream")]
    AlreadyPulling,
    #[error("a buffer is already alive for this stream")]
    BufferAlreadyAlive,
    #[error("source produced zero tracks")]
    NoTracks,
    #[error(transparent)]
    Source(#[from] anyhow::Error),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Why the push loop stopped, logged on every exit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    SourceExhausted,
    Deactivated,
    BufferShutdown,
}

/// Checks whether a buffer is already alive for this stream, e.g. by
/// probing the user signal page for an existing non-evicted writer. Kept
/// abstract so tests can simulate either outcome without shared memory.
pub trait BufferProbe {
    fn buffer_is_alive(&self) -> bool;
}

/// Relay packets from `source` into `writer` one at a time until end of
/// source, an external deactivation signal fires, or the buffer reports
/// itself shut down. Returns the reason the loop stopped.
pub async fn run(
    stream_name: &str,
    probe: &impl BufferProbe,
    mut source: impl PacketSource,
    writer: &impl PageWriter,
    is_active: impl Fn() -> bool,
    buffer_alive: impl Fn() -> bool,
) -> Result<StopReason, StreamError> {
    let sem = NamedSemaphore::open(stream_name)
        .map_err(|e| StreamError::Source(anyhow::anyhow!(e)))?;
    if !sem.try_wait() {
        return Err(StreamError::AlreadyPulling);
    }
    let release = || {
        sem.post();
        sem.unlink();
    };

    if probe.buffer_is_alive() {
        release();
        return Err(StreamError::BufferAlreadyAlive);
    }

    info!(stream = stream_name, "push input attached");

    let reason = loop {
        if !is_active() {
            break StopReason::Deactivated;
        }
        if !buffer_alive() {
            break StopReason::BufferShutdown;
        }
        let Some(packet) = source.next_packet().await.map_err(StreamError::Source)? else {
            break StopReason::SourceExhausted;
        };
        writer
            .buffer_next(packet.track, &packet)
            .await
            .map_err(StreamError::Source)?;
    };

    match reason {
        StopReason::SourceExhausted => info!(stream = stream_name, "source exhausted"),
        StopReason::Deactivated => warn!(stream = stream_name, "deactivated"),
        StopReason::BufferShutdown => warn!(stream = stream_name, "buffer shut down"),
    }
    release();
    Ok(reason)
}
