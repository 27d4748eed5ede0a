//! Shared-memory byte layout and the POSIX-backed region used to implement
//! it.
//!
//! Two kinds of pages live in shared memory:
//!
//! * The **user signal page** (`SHM_USERS(streamname)`): a sequence of
//!   fixed-size user records, each holding 5 slots of 6 bytes
//!   `[track_id: u32 BE][key_num: u16 BE]`. An egress worker writes into its
//!   own slots to request the next key on a track; a zero `track_id` means
//!   "unused".
//! * A per-track **meta page**: a sequence of 8-byte slots, whose upper 4
//!   bytes hold a page's first key number. Zeroing a slot marks that page
//!   evicted.
//!
//! All multi-byte fields are big-endian, matching the wire convention used
//! everywhere else in this codebase.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::FromRawFd;
use std::path::Path;

use memmap2::MmapMut;
use thiserror::Error;

pub const USER_SLOT_SIZE: usize = 6;
pub const USER_SLOTS_PER_RECORD: usize = 5;
pub const USER_RECORD_SIZE: usize = USER_SLOT_SIZE * USER_SLOTS_PER_RECORD;

pub const META_SLOT_SIZE: usize = 8;

/// Encode a `(track_id, key_num)` request tuple into one 6-byte user slot.
pub fn encode_user_slot(track_id: u32, key_num: u16) -> [u8; USER_SLOT_SIZE] {
    let mut buf = [0u8; USER_SLOT_SIZE];
    buf[0..4].copy_from_slice(&track_id.to_be_bytes());
    buf[4..6].copy_from_slice(&key_num.to_be_bytes());
    buf
}

/// Decode a 6-byte user slot back into `(track_id, key_num)`.
pub fn decode_user_slot(bytes: &[u8]) -> (u32, u16) {
    let track_id = u32::from_be_bytes(bytes[0..4].try_into().expect("slice is 4 bytes"));
    let key_num = u16::from_be_bytes(bytes[4..6].try_into().expect("slice is 2 bytes"));
    (track_id, key_num)
}

/// Encode a meta-page slot for a resident page's first key.
pub fn encode_meta_slot(first_key: u32) -> [u8; META_SLOT_SIZE] {
    let mut buf = [0u8; META_SLOT_SIZE];
    buf[0..4].copy_from_slice(&first_key.to_be_bytes());
    buf
}

/// The all-zero slot, meaning "no page resident here".
pub fn zeroed_meta_slot() -> [u8; META_SLOT_SIZE] {
    [0u8; META_SLOT_SIZE]
}

/// Decode a meta-page slot; `None` means the slot is empty (evicted).
pub fn decode_meta_slot(bytes: &[u8]) -> Option<u32> {
    let first_key = u32::from_be_bytes(bytes[0..4].try_into().expect("slice is 4 bytes"));
    if first_key == 0 {
        None
    } else {
        Some(first_key)
    }
}

#[derive(Debug, Error)]
pub enum ShmError {
    #[error("shm_open failed for {0:?}: {1}")]
    Open(String, io::Error),
    #[error("ftruncate failed for {0:?}: {1}")]
    Truncate(String, io::Error),
    #[error("mmap failed for {0:?}: {1}")]
    Map(String, io::Error),
}

/// A fixed-size, named, memory-mapped region.
///
/// Backed by POSIX shared memory (`shm_open`) when a `/name`-style name is
/// given, so that multiple processes (the input worker and egress clients)
/// can map the same region. Tests instead back this with a plain temp file,
/// which supports the identical mmap-based API without requiring the
/// sandbox to allow `/dev/shm`.
pub struct SharedRegion {
    mmap: MmapMut,
}

impl SharedRegion {
    /// Create (or re-open and resize) a POSIX shared memory region of
    /// exactly `size` bytes.
    pub fn create(name: &str, size: usize) -> Result<Self, ShmError> {
        // SAFETY: `name` is converted to a NUL-terminated C string below;
        // shm_open is called with a valid pointer and mode bits.
        let fd = {
            let cname = std::ffi::CString::new(name)
                .map_err(|_| ShmError::Open(name.to_string(), io::Error::from_raw_os_error(libc::EINVAL)))?;
            let fd = unsafe {
                libc::shm_open(cname.as_ptr(), libc::O_CREAT | libc::O_RDWR, 0o666)
            };
            if fd < 0 {
                return Err(ShmError::Open(name.to_string(), io::Error::last_os_error()));
            }
            fd
        };
        // SAFETY: `fd` was just returned by a successful `shm_open` and is
        // not used anywhere else; wrapping it in a `File` gives us a safe
        // `ftruncate`/mmap path and closes it on drop.
        let file = unsafe { std::fs::File::from_raw_fd(fd) };
        file.set_len(size as u64)
            .map_err(|e| ShmError::Truncate(name.to_string(), e))?;
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| ShmError::Map(name.to_string(), e))?;
        Ok(SharedRegion { mmap })
    }

    /// Back a region with a plain file instead of POSIX shared memory.
    /// Used by tests and by single-process deployments without `/dev/shm`.
    pub fn create_file_backed(path: &Path, size: usize) -> Result<Self, ShmError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| ShmError::Open(path.display().to_string(), e))?;
        file.set_len(size as u64)
            .map_err(|e| ShmError::Truncate(path.display().to_string(), e))?;
        let mmap = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| ShmError::Map(path.display().to_string(), e))?;
        Ok(SharedRegion { mmap })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

/// Remove a POSIX shared memory region's name from the system.
pub fn unlink(name: &str) {
    if let Ok(cname) = std::ffi::CString::new(name) {
        // SAFETY: `cname` is a valid NUL-terminated C string.
        unsafe {
            libc::shm_unlink(cname.as_ptr());
        }
    }
}
