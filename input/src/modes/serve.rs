//! On-demand `serve`: prebuffer key 1 of every track, then run a 1 Hz loop
//! that prefetches requested keys, sweeps idle pages, and tracks liveness.

use std::collections::HashMap;

use tracing::debug;
use utils::id::TrackId;
use utils::shm::{decode_user_slot, zeroed_meta_slot};

use crate::cache::{CacheError, DemandCache, PageWriter};
use crate::modes::KeepRunningState;
use crate::source::PacketSource;

/// One tick's worth of work: read the requested `(track, key)` pairs from
/// the user signal page, buffer anything newly requested, run the eviction
/// sweep, and report what got evicted so the caller can clear meta slots.
pub struct ServeLoop<S, W> {
    cache: DemandCache<S, W>,
    keep_running: KeepRunningState,
}

impl<S, W> ServeLoop<S, W>
where
    S: PacketSource,
    W: PageWriter,
{
    pub fn new(cache: DemandCache<S, W>, keep_running: KeepRunningState) -> Self {
        ServeLoop { cache, keep_running }
    }

    /// Prebuffer key 1 on every known track, as the boot path requires
    /// before entering the 1 Hz loop.
    pub async fn prebuffer_first_keys(&mut self, tracks: &[TrackId]) -> Result<(), CacheError> {
        for &track in tracks {
            self.cache.buffer_frame(track, 1).await?;
        }
        Ok(())
    }

    /// Decode a raw user-signal record (five 6-byte slots) into requested
    /// `(track, key)` pairs, ignoring unused (`track_id == 0`) slots.
    pub fn decode_user_record(record: &[u8]) -> Vec<(TrackId, u32)> {
        record
            .chunks(utils::shm::USER_SLOT_SIZE)
            .filter_map(|slot| {
                let (track_id, key_num) = decode_user_slot(slot);
                (track_id != 0).then(|| (TrackId(track_id), key_num as u32))
            })
            .collect()
    }

    /// Run one tick: buffer every requested key, then sweep idle pages.
    /// `now_secs` and `has_users` drive the `keepRunning()` liveness clock.
    pub async fn tick(
        &mut self,
        requests: &[(TrackId, u32)],
        now_secs: u64,
        has_tracks: bool,
    ) -> Result<Vec<(TrackId, u32)>, CacheError> {
        for &(track, key_num) in requests {
            self.cache.buffer_frame(track, key_num).await?;
        }
        let evicted = self.cache.idle_tick().await?;
        self.keep_running.touch(now_secs, !requests.is_empty(), has_tracks);
        for (track, first_key) in &evicted {
            debug!(%track, first_key, "evicted page, clearing meta slot");
        }
        Ok(evicted)
    }

    pub fn should_continue(&self, now_secs: u64, is_live: bool, biggest_fragment_ms: u64) -> bool {
        self.keep_running.keep_running(now_secs, is_live, biggest_fragment_ms)
    }

    pub fn deactivate(&mut self) {
        self.keep_running.deactivate();
    }

    /// Force every resident page to evict on the final sweep, on clean
    /// shutdown.
    pub async fn drain(&mut self) -> Result<Vec<(TrackId, u32)>, CacheError> {
        self.cache.drain();
        self.cache.idle_tick().await
    }
}

/// Clear map entries on clean shutdown for a caller that tracks its own
/// meta-slot offsets rather than going through `PageWriter::buffer_remove`.
pub fn cleared_meta_slot() -> [u8; utils::shm::META_SLOT_SIZE] {
    zeroed_meta_slot()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PageWriter;
    use crate::source::{MemorySource, Packet};
    use async_trait::async_trait;
    use media_api::model::{Key, Page, PagePolicy};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingWriter {
        starts: Mutex<usize>,
    }

    #[async_trait]
    impl PageWriter for CountingWriter {
        async fn buffer_start(&self, _track: TrackId, _page: &Page) -> anyhow::Result<()> {
            *self.starts.lock().unwrap() += 1;
            Ok(())
        }
        async fn buffer_next(&self, _track: TrackId, _packet: &crate::source::Packet) -> anyhow::Result<()> {
            Ok(())
        }
        async fn buffer_finalize(&self, _track: TrackId) -> anyhow::Result<()> {
            Ok(())
        }
        async fn buffer_remove(&self, _track: TrackId, _first_key: u32) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn single_track_cache() -> DemandCache<MemorySource, CountingWriter> {
        let track = TrackId(1);
        let keys: Vec<Key> = (0..5).map(|i| Key { time_ms: i * 1000, parts: 1, size: Some(10) }).collect();
        let policy = PagePolicy { flip_data_page_size: 1000, flip_target_duration_ms: 100_000, flip_min_duration_ms: 0 };
        let pages = media_api::paging::plan(&keys, policy);
        let packets: Vec<Packet> = (0..5)
            .map(|i| Packet { track, time_ms: i * 1000, is_key: true, data: vec![0; 10] })
            .collect();
        let source = MemorySource::new(packets);
        let mut tracks = HashMap::new();
        tracks.insert(track, (pages, 4_000));
        DemandCache::new(tracks, source, CountingWriter::default())
    }

    #[test]
    fn decodes_only_used_slots() {
        let mut record = vec![0u8; utils::shm::USER_RECORD_SIZE];
        record[0..6].copy_from_slice(&utils::shm::encode_user_slot(7, 3));
        let decoded = ServeLoop::<MemorySource, CountingWriter>::decode_user_record(&record);
        assert_eq!(decoded, vec![(TrackId(7), 3)]);
    }

    #[tokio::test]
    async fn prebuffer_then_tick_buffers_requested_key() {
        let cache = single_track_cache();
        let mut serve = ServeLoop::new(cache, KeepRunningState::new(30, 0));
        serve.prebuffer_first_keys(&[TrackId(1)]).await.unwrap();
        let evicted = serve.tick(&[(TrackId(1), 1)], 1, true).await.unwrap();
        assert!(evicted.is_empty());
    }

    #[tokio::test]
    async fn drain_evicts_everything() {
        let cache = single_track_cache();
        let mut serve = ServeLoop::new(cache, KeepRunningState::new(30, 0));
        serve.prebuffer_first_keys(&[TrackId(1)]).await.unwrap();
        let evicted = serve.drain().await.unwrap();
        assert_eq!(evicted.len(), 1);
    }
}
