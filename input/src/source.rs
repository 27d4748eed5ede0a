//! The packet source abstraction. Concrete demuxers for each supported
//! container format are external collaborators; this module only defines
//! the boundary and a simple in-memory source used by tests.

use async_trait::async_trait;
use utils::id::TrackId;

/// One immutable, track-tagged, timestamped packet.
#[derive(Debug, Clone)]
pub struct Packet {
    pub track: TrackId,
    pub time_ms: u64,
    pub is_key: bool,
    pub data: Vec<u8>,
}

/// A sequential, seekable source of packets. Implemented by the concrete
/// demuxer for each container format (out of scope here); tests use
/// [`MemorySource`].
#[async_trait]
pub trait PacketSource: Send {
    /// Seek so the next call to `next_packet` returns the first packet at
    /// or after `time_ms` on any track.
    async fn seek_ms(&mut self, time_ms: u64) -> anyhow::Result<()>;

    /// Return the next packet in the stream, or `None` at end of stream.
    async fn next_packet(&mut self) -> anyhow::Result<Option<Packet>>;
}

/// An in-memory packet source backed by a fixed, pre-sorted list. Used by
/// cache and mode tests; also a reasonable stand-in for an already-fully
/// buffered `convert` input.
pub struct MemorySource {
    packets: Vec<Packet>,
    cursor: usize,
}

impl MemorySource {
    pub fn new(mut packets: Vec<Packet>) -> Self {
        packets.sort_by_key(|p| p.time_ms);
        MemorySource { packets, cursor: 0 }
    }
}

#[async_trait]
impl PacketSource for MemorySource {
    async fn seek_ms(&mut self, time_ms: u64) -> anyhow::Result<()> {
        self.cursor = self.packets.partition_point(|p| p.time_ms < time_ms);
        Ok(())
    }

    async fn next_packet(&mut self) -> anyhow::Result<Option<Packet>> {
        let packet = self.packets.get(self.cursor).cloned();
        if packet.is_some() {
            self.cursor += 1;
        }
        Ok(packet)
    }
}
