//! The sidecar header file: a JSON-serialized [`Meta`] stored alongside the
//! source media, used to skip re-scanning on every boot.

use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use media_api::model::Meta;
use thiserror::Error;
use tracing::debug;

/// A source file is considered to have changed under it unless its header
/// is at least this many seconds newer than it.
const STALENESS_MARGIN_SECS: u64 = 15;

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("reading header {0}: {1}")]
    Read(Utf8PathBuf, std::io::Error),
    #[error("writing header {0}: {1}")]
    Write(Utf8PathBuf, std::io::Error),
    #[error("parsing header {0}: {1}")]
    Parse(Utf8PathBuf, serde_json::Error),
    #[error("stat'ing {0}: {1}")]
    Stat(Utf8PathBuf, std::io::Error),
}

/// Sidecar path for a given source media path: same directory and stem,
/// `.dtsh` extension.
pub fn sidecar_path(source: &Utf8Path) -> Utf8PathBuf {
    source.with_extension("dtsh")
}

/// Read and parse the sidecar header, if present.
pub fn read(path: &Utf8Path) -> Result<Option<Meta>, HeaderError> {
    match std::fs::read(path) {
        Ok(bytes) => {
            let meta = serde_json::from_slice(&bytes)
                .map_err(|e| HeaderError::Parse(path.to_owned(), e))?;
            Ok(Some(meta))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(HeaderError::Read(path.to_owned(), e)),
    }
}

pub fn write(path: &Utf8Path, meta: &Meta) -> Result<(), HeaderError> {
    let bytes = serde_json::to_vec_pretty(meta).expect("Meta always serializes");
    std::fs::write(path, bytes).map_err(|e| HeaderError::Write(path.to_owned(), e))
}

/// `true` if the header at `header_path` is stale relative to `source_path`
/// and must be regenerated: the header's mtime is not at least
/// [`STALENESS_MARGIN_SECS`] newer than the source's. A header that doesn't
/// exist is always stale.
pub fn is_stale(header_path: &Utf8Path, source_path: &Utf8Path) -> Result<bool, HeaderError> {
    let header_mtime = match std::fs::metadata(header_path) {
        Ok(m) => m.modified().map_err(|e| HeaderError::Stat(header_path.to_owned(), e))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(HeaderError::Stat(header_path.to_owned(), e)),
    };
    let source_mtime = std::fs::metadata(source_path)
        .and_then(|m| m.modified())
        .map_err(|e| HeaderError::Stat(source_path.to_owned(), e))?;

    let margin = std::time::Duration::from_secs(STALENESS_MARGIN_SECS);
    let stale = header_mtime < source_mtime + margin;
    if stale {
        debug!(%header_path, %source_path, "header is stale, will regenerate");
    }
    Ok(stale)
}

/// Current wall-clock time as unix seconds, used for log timestamps.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_api::model::Meta;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn sidecar_path_swaps_extension() {
        let source = Utf8PathBuf::from("/media/live/cam1.ts");
        assert_eq!(sidecar_path(&source), Utf8PathBuf::from("/media/live/cam1.dtsh"));
    }

    #[test]
    fn missing_header_round_trips_to_none() {
        let dir = camino_tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.dtsh");
        assert!(read(&path).unwrap().is_none());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = camino_tempfile::tempdir().unwrap();
        let path = dir.path().join("cam1.dtsh");
        let meta = Meta::new("cam1.ts");
        write(&path, &meta).unwrap();
        let read_back = read(&path).unwrap().unwrap();
        assert_eq!(read_back.source_uri, "cam1.ts");
    }

    #[test]
    fn missing_header_is_always_stale() {
        let dir = camino_tempfile::tempdir().unwrap();
        let header = dir.path().join("missing.dtsh");
        let source = dir.path().join("source.ts");
        std::fs::write(&source, b"x").unwrap();
        assert!(is_stale(&header, &source).unwrap());
    }

    #[test]
    fn header_within_the_margin_of_source_still_counts_as_stale() {
        let dir = camino_tempfile::tempdir().unwrap();
        let source = dir.path().join("source.ts");
        std::fs::write(&source, b"x").unwrap();
        sleep(Duration::from_millis(10));
        let header = dir.path().join("source.dtsh");
        std::fs::write(&header, b"{}").unwrap();
        // Header is newer than source but by far less than the 15s margin,
        // so it still counts as stale. This asserts the comparison
        // direction, not wall-clock precision.
        assert!(is_stale(&header, &source).unwrap());
    }
}
