//! The in-memory description of a stream: tracks, keys, and pages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utils::id::TrackId;

/// A GOP anchor: a keyframe and the packets that depend on it, up to the
/// next key. Keys are monotonic in time per track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    /// Presentation time in milliseconds.
    pub time_ms: u64,
    /// Count of packets belonging to this key.
    pub parts: u32,
    /// Byte size of this key's packets, if known up front.
    pub size: Option<u64>,
}

/// One elementary media channel within a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub codec: String,
    pub first_ms: u64,
    pub last_ms: u64,
    pub live: bool,
    /// 0-indexed internally; the external protocol is 1-indexed (`KeyNum`).
    pub keys: Vec<Key>,
}

impl Track {
    pub fn new(id: TrackId, codec: impl Into<String>) -> Self {
        Track {
            id,
            codec: codec.into(),
            first_ms: 0,
            last_ms: 0,
            live: false,
            keys: Vec::new(),
        }
    }

    /// Milliseconds of the biggest single key's worth of packets. Used by
    /// `keepRunning()`'s live-stream grace window.
    pub fn biggest_fragment_ms(&self) -> u64 {
        let mut biggest = 0;
        for w in self.keys.windows(2) {
            biggest = biggest.max(w[1].time_ms.saturating_sub(w[0].time_ms));
        }
        biggest
    }

    /// `true` if `key_index` (0-indexed) is within the known key array.
    pub fn has_key(&self, key_index: usize) -> bool {
        key_index < self.keys.len()
    }
}

/// A contiguous, cache-resident run of keys on one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 1-indexed number of the first key in this page.
    pub first_key: u32,
    /// Count of keys in the page.
    pub key_num: u32,
    /// Count of packets in the page.
    pub part_num: u64,
    /// Byte size of the page's data.
    pub data_size: u64,
    /// Presentation time of the first key, in milliseconds.
    pub first_time_ms: u64,
}

impl Page {
    /// The first key not covered by this page (1-indexed), i.e. `first_key
    /// + key_num`.
    pub fn next_first_key(&self) -> u32 {
        self.first_key + self.key_num
    }
}

/// The serialized descriptor of all of a stream's tracks and keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub version: u64,
    pub source_uri: String,
    pub tracks: BTreeMap<TrackId, Track>,
}

impl Meta {
    pub fn new(source_uri: impl Into<String>) -> Self {
        Meta {
            version: 1,
            source_uri: source_uri.into(),
            tracks: BTreeMap::new(),
        }
    }

    /// Reset positional/live state for a fresh `convert` output, as the
    /// original does before re-emitting packets with recomputed byte
    /// offsets: bump the version and clear the `live` flag on every track.
    pub fn reset_for_convert(&mut self) {
        self.version += 1;
        for track in self.tracks.values_mut() {
            track.live = false;
        }
    }
}

/// Tuning parameters for the paging planner. Frozen for the life of a
/// process; must be identical across planner runs on the same stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagePolicy {
    pub flip_data_page_size: u64,
    pub flip_target_duration_ms: u64,
    pub flip_min_duration_ms: u64,
}

impl Default for PagePolicy {
    fn default() -> Self {
        PagePolicy {
            flip_data_page_size: 20 * 1024 * 1024,
            flip_target_duration_ms: 4_000,
            flip_min_duration_ms: 2_000,
        }
    }
}
