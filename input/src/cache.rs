//! The demand cache: reference-counted page residency with countdown-based
//! eviction on an idle timer.
//!
//! `buffer_frame(track, key)` ensures the page containing `key` is resident
//! and refreshes its countdown to [`TOUCH_COUNTER`]. Every idle tick, every
//! resident page's counter decays by one; at zero the page is evicted and
//! its meta-page slot is cleared.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use media_api::model::Page;
use media_api::paging::page_for_key;
use thiserror::Error;
use utils::id::TrackId;

use crate::source::{Packet, PacketSource};

/// Counter value a page's residency is refreshed to on every successful
/// `buffer_frame`. Chosen so a page survives ~15s of idleness (one tick per
/// second) before eviction.
pub const TOUCH_COUNTER: i32 = 15;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("unknown track {0}")]
    UnknownTrack(TrackId),
    #[error("source error: {0:#}")]
    Source(#[from] anyhow::Error),
}

/// Writes page contents into the backing store (the shared page store, in
/// production). Abstracted so the cache's sequencing logic can be tested
/// without real shared memory.
#[async_trait]
pub trait PageWriter: Send + Sync {
    async fn buffer_start(&self, track: TrackId, page: &Page) -> anyhow::Result<()>;
    async fn buffer_next(&self, track: TrackId, packet: &Packet) -> anyhow::Result<()>;
    async fn buffer_finalize(&self, track: TrackId) -> anyhow::Result<()>;
    async fn buffer_remove(&self, track: TrackId, first_key: u32) -> anyhow::Result<()>;
}

struct TrackLayout {
    pages: BTreeMap<u32, Page>,
    last_ms: u64,
}

pub struct DemandCache<S, W> {
    tracks: HashMap<TrackId, TrackLayout>,
    /// Residency countdown, keyed by (track, first_key).
    resident: HashMap<(TrackId, u32), i32>,
    /// Highest packet timestamp already buffered per track; buffering
    /// refuses to re-emit anything at or before this watermark.
    last_buffered_ms: HashMap<TrackId, u64>,
    source: S,
    writer: W,
}

impl<S, W> DemandCache<S, W>
where
    S: PacketSource,
    W: PageWriter,
{
    pub fn new(
        pages: HashMap<TrackId, (BTreeMap<u32, Page>, u64)>,
        source: S,
        writer: W,
    ) -> Self {
        let tracks = pages
            .into_iter()
            .map(|(track, (pages, last_ms))| (track, TrackLayout { pages, last_ms }))
            .collect();
        DemandCache {
            tracks,
            resident: HashMap::new(),
            last_buffered_ms: HashMap::new(),
            source,
            writer,
        }
    }

    fn last_key_num(&self, track: TrackId) -> Option<u32> {
        self.tracks
            .get(&track)
            .and_then(|t| t.pages.values().last())
            .map(|p| p.next_first_key() - 1)
    }

    /// Ensure the page containing `key_num` is resident, refreshing its
    /// countdown. Silently succeeds past end-of-stream; clamps below 1.
    pub async fn buffer_frame(&mut self, track: TrackId, key_num: u32) -> Result<(), CacheError> {
        if !self.tracks.contains_key(&track) {
            return Err(CacheError::UnknownTrack(track));
        }
        let key_num = key_num.max(1);
        if let Some(last) = self.last_key_num(track) {
            if key_num > last {
                return Ok(()); // end of stream, nothing to do
            }
        }

        let page = {
            let layout = self.tracks.get(&track).expect("checked above");
            *page_for_key(&layout.pages, key_num).expect("key_num is within range")
        };

        if self.resident.contains_key(&(track, page.first_key)) {
            self.touch(track, page.first_key);
            return Ok(());
        }

        self.writer.buffer_start(track, &page).await?;

        let stop_ms = {
            let layout = self.tracks.get(&track).expect("checked above");
            layout
                .pages
                .range((page.next_first_key())..)
                .next()
                .map(|(_, next)| next.first_time_ms)
                .unwrap_or(layout.last_ms + 1)
        };

        self.source.seek_ms(page.first_time_ms).await?;
        let mut last_buffered = self.last_buffered_ms.get(&track).copied().unwrap_or(0);
        loop {
            let Some(packet) = self.source.next_packet().await? else {
                break;
            };
            if packet.time_ms >= stop_ms {
                break;
            }
            if packet.track == track && packet.time_ms > last_buffered {
                self.writer.buffer_next(track, &packet).await?;
                last_buffered = packet.time_ms;
            }
        }
        self.last_buffered_ms.insert(track, last_buffered);

        self.writer.buffer_finalize(track).await?;
        self.resident.insert((track, page.first_key), TOUCH_COUNTER);
        Ok(())
    }

    fn touch(&mut self, track: TrackId, first_key: u32) {
        if let Some(counter) = self.resident.get_mut(&(track, first_key)) {
            *counter = TOUCH_COUNTER;
        }
    }

    /// Run one idle-tick eviction sweep: decrement every resident page's
    /// counter, evict any that reach zero. Returns the `(track, first_key)`
    /// pairs evicted this tick, so the caller can clear their meta-page
    /// slots.
    pub async fn idle_tick(&mut self) -> Result<Vec<(TrackId, u32)>, CacheError> {
        for counter in self.resident.values_mut() {
            *counter -= 1;
        }
        let expired: Vec<(TrackId, u32)> = self
            .resident
            .iter()
            .filter(|(_, counter)| **counter <= 0)
            .map(|(key, _)| *key)
            .collect();
        for (track, first_key) in &expired {
            self.writer.buffer_remove(*track, *first_key).await?;
            self.resident.remove(&(*track, *first_key));
        }
        Ok(expired)
    }

    /// Force every resident page's counter to 1, so the next `idle_tick`
    /// evicts everything and clears every meta-page slot. Called on clean
    /// shutdown.
    pub fn drain(&mut self) {
        for counter in self.resident.values_mut() {
            *counter = 1;
        }
    }

    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    pub fn is_resident(&self, track: TrackId, first_key: u32) -> bool {
        self.resident.contains_key(&(track, first_key))
    }
}
