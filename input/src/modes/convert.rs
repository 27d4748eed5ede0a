//! Offline `convert`: read a source sequentially, re-emit its packets with
//! recomputed byte positions, and write a fresh sidecar header.

use camino::Utf8Path;
use media_api::model::Meta;
use thiserror::Error;
use tracing::info;

use crate::header;
use crate::source::PacketSource;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("output must be specified, not '-'")]
    OutputIsStdout,
    #[error(transparent)]
    Source(#[from] anyhow::Error),
    #[error(transparent)]
    Header(#[from] header::HeaderError),
}

/// Append `.dtsc` to `output` if it doesn't already end with that
/// extension.
pub fn normalize_output_path(output: &Utf8Path) -> camino::Utf8PathBuf {
    if output.extension() == Some("dtsc") {
        output.to_owned()
    } else {
        let mut s = output.to_string();
        s.push_str(".dtsc");
        camino::Utf8PathBuf::from(s)
    }
}

/// Drain `source` fully (recomputing nothing here ourselves; the byte
/// positions are a property of however the caller serializes packets to
/// `output`), then write the `.dtsh` sidecar for `meta` next to it.
pub async fn run(
    mut source: impl PacketSource,
    mut meta: Meta,
    output: &Utf8Path,
) -> Result<Meta, ConvertError> {
    if output.as_str() == "-" {
        return Err(ConvertError::OutputIsStdout);
    }
    let output = normalize_output_path(output);

    let mut packet_count = 0u64;
    source.seek_ms(0).await?;
    while source.next_packet().await?.is_some() {
        packet_count += 1;
    }

    meta.reset_for_convert();
    let sidecar = header::sidecar_path(&output);
    header::write(&sidecar, &meta)?;
    info!(%output, packet_count, "convert complete");
    Ok(meta)
}
