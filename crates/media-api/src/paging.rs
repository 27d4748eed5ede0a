//! Groups a track's keys into cache-resident pages, trading off page size,
//! duration, and key count.
//!
//! A page flips (closes) only when both:
//! * `dataSize > flip_data_page_size` OR `duration > flip_target_duration_ms`
//! * `duration > flip_min_duration_ms`
//!
//! where `duration` is measured from the page's first key to the key that
//! triggered the check. Only the min-duration floor can make a page longer
//! than the target; nothing makes a page shorter than it except running out
//! of keys.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::model::{Key, Page, PagePolicy};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("planner referenced key index {index} beyond the header's {len} known keys")]
    CorruptHeader { index: usize, len: usize },
}

struct OpenPage {
    first_key: u32,
    first_time_ms: u64,
    key_num: u32,
    part_num: u64,
    data_size: u64,
}

impl OpenPage {
    fn start(first_key: u32, key: &Key) -> Self {
        OpenPage {
            first_key,
            first_time_ms: key.time_ms,
            key_num: 1,
            part_num: key.parts as u64,
            data_size: key.size.unwrap_or(0),
        }
    }

    fn duration_ms(&self, at: &Key) -> u64 {
        at.time_ms.saturating_sub(self.first_time_ms)
    }

    fn should_flip(&self, policy: &PagePolicy, next_key: &Key) -> bool {
        let over_size_or_duration = self.data_size > policy.flip_data_page_size
            || self.duration_ms(next_key) > policy.flip_target_duration_ms;
        let past_min_duration = self.duration_ms(next_key) > policy.flip_min_duration_ms;
        over_size_or_duration && past_min_duration
    }

    fn absorb(&mut self, key: &Key) {
        self.key_num += 1;
        self.part_num += key.parts as u64;
        self.data_size += key.size.unwrap_or(0);
    }

    fn close(self) -> Page {
        Page {
            first_key: self.first_key,
            key_num: self.key_num,
            part_num: self.part_num,
            data_size: self.data_size,
            first_time_ms: self.first_time_ms,
        }
    }
}

/// A stateful, one-key-at-a-time page builder. Used both to plan pages for
/// a track whose keys are already fully known, and by the input runtime to
/// plan pages live as packets arrive and key boundaries are detected.
pub struct IncrementalPlanner {
    policy: PagePolicy,
    open: Option<OpenPage>,
    keys_seen: u32,
}

impl IncrementalPlanner {
    pub fn new(policy: PagePolicy) -> Self {
        IncrementalPlanner {
            policy,
            open: None,
            keys_seen: 0,
        }
    }

    /// Feed the next key in time order. Returns a just-closed page if this
    /// key caused the previous one to flip.
    pub fn push_key(&mut self, key: &Key) -> Option<Page> {
        self.keys_seen += 1;
        let this_first_key = self.keys_seen;
        match &mut self.open {
            None => {
                self.open = Some(OpenPage::start(this_first_key, key));
                None
            }
            Some(open) => {
                if open.should_flip(&self.policy, key) {
                    let closed = self.open.replace(OpenPage::start(this_first_key, key)).unwrap();
                    Some(closed.close())
                } else {
                    open.absorb(key);
                    None
                }
            }
        }
    }

    /// Close out whatever page is still open (the final, possibly-short,
    /// page). Returns `None` if no keys were ever pushed.
    pub fn finish(mut self) -> Option<Page> {
        self.open.take().map(OpenPage::close)
    }
}

/// Plan pages for a track whose keys (with sizes) are fully known
/// up-front. Returns a map keyed by each page's first key number, for
/// O(log n) "page containing key K" lookup (largest `first_key <= K`).
pub fn plan(keys: &[Key], policy: PagePolicy) -> BTreeMap<u32, Page> {
    let mut planner = IncrementalPlanner::new(policy);
    let mut pages = BTreeMap::new();
    for key in keys {
        if let Some(page) = planner.push_key(key) {
            pages.insert(page.first_key, page);
        }
    }
    if let Some(page) = planner.finish() {
        pages.insert(page.first_key, page);
    }
    pages
}

/// Find the page covering `key_num` (1-indexed), i.e. the page with the
/// largest `first_key <= key_num`.
pub fn page_for_key(pages: &BTreeMap<u32, Page>, key_num: u32) -> Option<&Page> {
    pages.range(..=key_num).next_back().map(|(_, page)| page)
}

/// Validate that `key_index` (0-indexed) is within the declared key count,
/// as the planner must before dereferencing it; a violation means the
/// sidecar header is corrupt and must be regenerated.
pub fn check_key_index(key_index: usize, declared_len: usize) -> Result<(), PlanError> {
    if key_index >= declared_len {
        Err(PlanError::CorruptHeader {
            index: key_index,
            len: declared_len,
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(time_ms: u64, size: u64) -> Key {
        Key {
            time_ms,
            parts: 1,
            size: Some(size),
        }
    }

    #[test]
    fn pages_partition_keys_contiguously() {
        let keys: Vec<Key> = (0..10).map(|i| key(i * 1000, 100)).collect();
        let policy = PagePolicy {
            flip_data_page_size: 400,
            flip_target_duration_ms: 5_000,
            flip_min_duration_ms: 1_000,
        };
        let pages = plan(&keys, policy);
        let mut covered = 0u32;
        for page in pages.values() {
            assert_eq!(page.first_key, covered + 1);
            covered += page.key_num;
        }
        assert_eq!(covered, keys.len() as u32);
    }

    #[test]
    fn scenario_size_cap_closes_at_five_keys() {
        // keys at 0,1000,...,10000ms, uniform size S, FLIP_DATA_PAGE_SIZE=4S
        let s = 100u64;
        let keys: Vec<Key> = (0..=10).map(|i| key(i * 1000, s)).collect();
        let policy = PagePolicy {
            flip_data_page_size: 4 * s,
            flip_target_duration_ms: 5_000,
            flip_min_duration_ms: 1_000,
        };
        let pages = plan(&keys, policy);
        let first = pages.get(&1).unwrap();
        assert_eq!(first.key_num, 5);
        let second = pages.get(&6).unwrap();
        assert_eq!(second.key_num, 5);
    }

    #[test]
    fn min_duration_floor_overrides_size_cap() {
        let keys: Vec<Key> = vec![key(0, 1000), key(100, 1000), key(5000, 1000)];
        let policy = PagePolicy {
            flip_data_page_size: 500, // exceeded immediately
            flip_target_duration_ms: 10_000,
            flip_min_duration_ms: 2_000,
        };
        let pages = plan(&keys, policy);
        // second key at 100ms: size cap exceeded but duration (100ms) is
        // not past min duration (2000ms), so the page must not flip yet.
        let first = pages.get(&1).unwrap();
        assert_eq!(first.key_num, 2);
    }

    #[test]
    fn page_lookup_finds_largest_first_key_leq_target() {
        let keys: Vec<Key> = (0..20).map(|i| key(i * 1000, 50)).collect();
        let policy = PagePolicy {
            flip_data_page_size: 200,
            flip_target_duration_ms: 100_000,
            flip_min_duration_ms: 0,
        };
        let pages = plan(&keys, policy);
        let page = page_for_key(&pages, 7).unwrap();
        assert!(page.first_key <= 7 && page.next_first_key() > 7);
    }

    #[test]
    fn corrupt_header_detected_on_out_of_range_index() {
        assert!(check_key_index(4, 5).is_ok());
        assert_eq!(
            check_key_index(5, 5),
            Err(PlanError::CorruptHeader { index: 5, len: 5 })
        );
    }
}
