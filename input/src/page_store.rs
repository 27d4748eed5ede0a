//! The shared page store: the `PageWriter` used in production, writing
//! page contents and track metadata into POSIX shared memory so the
//! controller's HTTP layer and other local readers can serve them without
//! going through this process.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use media_api::model::Page;
use utils::id::TrackId;
use utils::shm::{encode_meta_slot, zeroed_meta_slot, SharedRegion, META_SLOT_SIZE};

use crate::cache::PageWriter;
use crate::source::Packet;

/// Max number of simultaneously resident pages tracked per track's meta
/// region. Generous relative to the demand cache's residency window.
/// `pub` so callers sizing the backing `SharedRegion` (the meta region must
/// hold exactly this many `META_SLOT_SIZE` slots) can stay in sync.
pub const META_SLOTS_PER_TRACK: usize = 64;

struct TrackState {
    meta: SharedRegion,
    /// Maps a resident page's first key to the meta slot index holding it.
    slot_of: HashMap<u32, usize>,
    building: Option<Vec<u8>>,
    building_first_key: Option<u32>,
}

impl TrackState {
    fn free_slot(&self) -> usize {
        (0..META_SLOTS_PER_TRACK)
            .find(|i| !self.slot_of.values().any(|used| used == i))
            .expect("meta region exhausted: more resident pages than META_SLOTS_PER_TRACK")
    }

    fn write_slot(&mut self, index: usize, bytes: &[u8; META_SLOT_SIZE]) {
        let start = index * META_SLOT_SIZE;
        self.meta.as_mut_slice()[start..start + META_SLOT_SIZE].copy_from_slice(bytes);
    }
}

/// Shared-memory-backed page writer. Each track gets its own meta-page
/// region holding one slot per resident page; page bytes accumulate in an
/// in-process buffer and are flushed to a per-page region on finalize.
pub struct SharedPageStore {
    tracks: Mutex<HashMap<TrackId, TrackState>>,
    region_for: Box<dyn Fn(TrackId, u32) -> anyhow::Result<SharedRegion> + Send + Sync>,
    meta_region_for: Box<dyn Fn(TrackId) -> anyhow::Result<SharedRegion> + Send + Sync>,
}

impl SharedPageStore {
    pub fn new(
        region_for: impl Fn(TrackId, u32) -> anyhow::Result<SharedRegion> + Send + Sync + 'static,
        meta_region_for: impl Fn(TrackId) -> anyhow::Result<SharedRegion> + Send + Sync + 'static,
    ) -> Self {
        SharedPageStore {
            tracks: Mutex::new(HashMap::new()),
            region_for: Box::new(region_for),
            meta_region_for: Box::new(meta_region_for),
        }
    }

    fn ensure_track(&self, track: TrackId) -> anyhow::Result<()> {
        let mut tracks = self.tracks.lock().unwrap();
        if !tracks.contains_key(&track) {
            let meta = (self.meta_region_for)(track)?;
            tracks.insert(
                track,
                TrackState {
                    meta,
                    slot_of: HashMap::new(),
                    building: None,
                    building_first_key: None,
                },
            );
        }
        Ok(())
    }
}

#[async_trait]
impl PageWriter for SharedPageStore {
    async fn buffer_start(&self, track: TrackId, page: &Page) -> anyhow::Result<()> {
        self.ensure_track(track)?;
        let mut tracks = self.tracks.lock().unwrap();
        let state = tracks.get_mut(&track).expect("inserted above");
        state.building = Some(Vec::with_capacity(page.data_size as usize));
        state.building_first_key = Some(page.first_key);
        Ok(())
    }

    async fn buffer_next(&self, track: TrackId, packet: &Packet) -> anyhow::Result<()> {
        let mut tracks = self.tracks.lock().unwrap();
        let state = tracks
            .get_mut(&track)
            .ok_or_else(|| anyhow::anyhow!("buffer_next before buffer_start for track {track}"))?;
        let buf = state
            .building
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("buffer_next outside an open page for track {track}"))?;
        buf.extend_from_slice(&packet.data);
        Ok(())
    }

    async fn buffer_finalize(&self, track: TrackId) -> anyhow::Result<()> {
        let (first_key, bytes) = {
            let mut tracks = self.tracks.lock().unwrap();
            let state = tracks.get_mut(&track).ok_or_else(|| {
                anyhow::anyhow!("buffer_finalize before buffer_start for track {track}")
            })?;
            let bytes = state.building.take().unwrap_or_default();
            let first_key = state
                .building_first_key
                .take()
                .ok_or_else(|| anyhow::anyhow!("buffer_finalize outside an open page for track {track}"))?;
            (first_key, bytes)
        };

        let mut region = (self.region_for)(track, first_key)?;
        region.as_mut_slice()[..bytes.len()].copy_from_slice(&bytes);

        let mut tracks = self.tracks.lock().unwrap();
        let state = tracks.get_mut(&track).expect("present");
        let slot = state.free_slot();
        state.write_slot(slot, &encode_meta_slot(first_key));
        state.slot_of.insert(first_key, slot);
        Ok(())
    }

    async fn buffer_remove(&self, track: TrackId, first_key: u32) -> anyhow::Result<()> {
        let mut tracks = self.tracks.lock().unwrap();
        let Some(state) = tracks.get_mut(&track) else {
            return Ok(());
        };
        if let Some(slot) = state.slot_of.remove(&first_key) {
            state.write_slot(slot, &zeroed_meta_slot());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_over_tempdir(dir: &camino_tempfile::Utf8TempDir) -> SharedPageStore {
        let pages_dir = dir.path().to_owned();
        let meta_dir = dir.path().to_owned();
        SharedPageStore::new(
            move |track, first_key| {
                Ok(SharedRegion::create_file_backed(
                    pages_dir.join(format!("page-{track}-{first_key}")).as_std_path(),
                    64,
                )?)
            },
            move |track| {
                Ok(SharedRegion::create_file_backed(
                    meta_dir.join(format!("meta-{track}")).as_std_path(),
                    META_SLOTS_PER_TRACK * META_SLOT_SIZE,
                )?)
            },
        )
    }

    fn page(first_key: u32, data_size: u64) -> Page {
        Page {
            first_key,
            key_num: 1,
            part_num: 1,
            data_size,
            first_time_ms: 0,
        }
    }

    #[tokio::test]
    async fn finalize_writes_bytes_and_stamps_a_meta_slot() {
        let dir = camino_tempfile::tempdir().unwrap();
        let track = TrackId(1);
        let store = store_over_tempdir(&dir);

        store.buffer_start(track, &page(1, 4)).await.unwrap();
        store
            .buffer_next(
                track,
                &Packet {
                    track,
                    time_ms: 0,
                    is_key: true,
                    data: vec![1, 2, 3, 4],
                },
            )
            .await
            .unwrap();
        store.buffer_finalize(track).await.unwrap();

        let tracks = store.tracks.lock().unwrap();
        let state = tracks.get(&track).unwrap();
        assert_eq!(state.slot_of.get(&1), Some(&0));
        drop(tracks);

        store.buffer_remove(track, 1).await.unwrap();
        let tracks = store.tracks.lock().unwrap();
        let state = tracks.get(&track).unwrap();
        assert!(!state.slot_of.contains_key(&1));
    }

    #[tokio::test]
    async fn distinct_pages_get_distinct_meta_slots() {
        let dir = camino_tempfile::tempdir().unwrap();
        let track = TrackId(1);
        let store = store_over_tempdir(&dir);

        for first_key in [1u32, 6, 11] {
            store.buffer_start(track, &page(first_key, 1)).await.unwrap();
            store
                .buffer_next(
                    track,
                    &Packet { track, time_ms: 0, is_key: true, data: vec![9] },
                )
                .await
                .unwrap();
            store.buffer_finalize(track).await.unwrap();
        }

        let tracks = store.tracks.lock().unwrap();
        let state = tracks.get(&track).unwrap();
        let slots: std::collections::HashSet<_> = state.slot_of.values().copied().collect();
        assert_eq!(slots.len(), 3);
    }
}
