//! Newtype identifiers used across the input runtime and the controller.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The unique slug of a stream, e.g. `"live/camera1"`.
///
/// Stream names are used to build semaphore names and shared memory region
/// names, so we keep them restricted to a conservative character set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamName(String);

impl StreamName {
    pub fn new(name: impl Into<String>) -> anyhow::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            anyhow::bail!("stream name must not be empty");
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'))
        {
            anyhow::bail!("stream name {name:?} contains invalid characters");
        }
        Ok(StreamName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the named binary semaphore guarding this stream's single
    /// active input process.
    pub fn input_semaphore_name(&self) -> String {
        format!("/input_lock_{}", self.sanitized())
    }

    /// Name of the named binary semaphore guarding an on-demand pull/boot.
    pub fn pull_semaphore_name(&self) -> String {
        format!("/pull_lock_{}", self.sanitized())
    }

    /// Name of this stream's shared memory user-signal region.
    pub fn users_shm_name(&self) -> String {
        format!("/shm_users_{}", self.sanitized())
    }

    /// POSIX shared memory and semaphore names must be a single path
    /// component; slashes inside the stream name itself are folded to `-`.
    fn sanitized(&self) -> String {
        self.0.replace('/', "-")
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StreamName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamName::new(s)
    }
}

/// Numeric id of a track within a stream. Tracks are numbered independently
/// per stream, so this is not globally unique.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 1-indexed key (GOP anchor) number, as used in the external protocol.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyNum(pub u32);

impl KeyNum {
    pub const FIRST: KeyNum = KeyNum(1);
}

impl fmt::Display for KeyNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
