use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use input::cache::DemandCache;
use input::cli::{exit_code, Cli};
use input::header;
use input::modes::serve::ServeLoop;
use input::modes::{capabilities, stream, KeepRunningState};
use input::page_store::{SharedPageStore, META_SLOTS_PER_TRACK};
use input::source::{MemorySource, Packet};
use input::supervisor::{supervise, BackoffPolicy, SupervisorOutcome};
use media_api::model::{Key, Meta, Page, PagePolicy, Track};
use tracing::{error, info};
use utils::id::{StreamName, TrackId};
use utils::process::ReExecRunner;
use utils::shm::{SharedRegion, META_SLOT_SIZE, USER_RECORD_SIZE};

/// Internal flag the supervisor passes to the re-exec'd child so it skips
/// straight to doing the work instead of spawning another supervisor.
const WORKER_FLAG: &str = "--worker-child";

/// How long a `serve`/`stream` worker sits idle (no requesting users) before
/// it exits, per `KeepRunningState`'s generic timeout.
const INPUT_TIMEOUT_SECS: u64 = 30;

/// Max concurrent egress clients a `serve` worker's user-signal page has
/// room for.
const MAX_USER_RECORDS: usize = 64;

#[tokio::main]
async fn main() {
    utils::logging::init(0);

    let raw_args: Vec<String> = std::env::args().collect();
    let is_worker_child = raw_args.iter().any(|a| a == WORKER_FLAG);
    let cli_args: Vec<String> = raw_args
        .into_iter()
        .skip(1)
        .filter(|a| a != WORKER_FLAG)
        .collect();
    let cli = Cli::parse_from(std::iter::once("input".to_string()).chain(cli_args.clone()));

    if cli.json {
        println!("{}", capabilities());
        std::process::exit(exit_code::CLEAN);
    }

    let code = if is_worker_child {
        run_worker(&cli).await
    } else {
        run_supervisor(&cli, &cli_args).await
    };
    std::process::exit(code);
}

async fn run_supervisor(cli: &Cli, cli_args: &[String]) -> i32 {
    let Some(stream_name) = &cli.stream_name else {
        // No stream name: a one-shot `convert` needs no lock or supervision.
        return run_worker(cli).await;
    };
    let stream_name = match StreamName::new(stream_name.clone()) {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "invalid stream name");
            return exit_code::LOCK_HELD_OR_BAD_ARGS;
        }
    };

    let mut args = cli_args.to_vec();
    args.push(WORKER_FLAG.to_string());
    let runner = ReExecRunner;
    match supervise(
        &runner,
        &args,
        &stream_name.input_semaphore_name(),
        &BackoffPolicy::default(),
    )
    .await
    {
        Ok(SupervisorOutcome::Terminated) => exit_code::CLEAN,
        Ok(SupervisorOutcome::AlreadyLocked) => {
            error!(stream = %stream_name, "another input already owns this stream");
            exit_code::LOCK_HELD_OR_BAD_ARGS
        }
        Err(e) => {
            error!(error = %e, "supervisor I/O error");
            exit_code::SPAWN_FAILURE
        }
    }
}

/// Do the actual work for this invocation: `convert` when an output path is
/// given, otherwise `serve` or push-mode `stream` against `--stream`.
async fn run_worker(cli: &Cli) -> i32 {
    let Some(input_path) = &cli.input else {
        error!("missing input path");
        return exit_code::LOCK_HELD_OR_BAD_ARGS;
    };

    match &cli.output {
        Some(output) if output != "-" => run_convert(input_path, output).await,
        _ => match &cli.stream_name {
            Some(stream_name) => run_online_worker(cli, stream_name, input_path).await,
            None => {
                error!("serve/stream worker requires --stream <name>");
                exit_code::LOCK_HELD_OR_BAD_ARGS
            }
        },
    }
}

async fn run_convert(input_path: &str, output: &str) -> i32 {
    info!(input_path, output, "starting convert");
    let (source, meta, ..) = match load_single_track(input_path).await {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "reading input");
            return exit_code::LOCK_HELD_OR_BAD_ARGS;
        }
    };
    let output = Utf8PathBuf::from(output);
    match input::modes::convert::run(source, meta, &output).await {
        Ok(_) => exit_code::CLEAN,
        Err(e) => {
            error!(error = %e, "convert failed");
            exit_code::LOCK_HELD_OR_BAD_ARGS
        }
    }
}

/// Read `input_path` in full (or stdin, for `-`) and wrap it as a single key
/// on a single synthetic track. A concrete demuxer is an external
/// collaborator this crate doesn't implement; this is a reasonable
/// stand-in, matching `MemorySource`'s own doc comment.
async fn load_single_track(
    input_path: &str,
) -> anyhow::Result<(MemorySource, Meta, BTreeMap<u32, Page>, u64, TrackId)> {
    let bytes = if input_path == "-" {
        use tokio::io::AsyncReadExt;
        let mut buf = Vec::new();
        tokio::io::stdin().read_to_end(&mut buf).await?;
        buf
    } else {
        tokio::fs::read(input_path).await?
    };

    let track = TrackId(1);
    let key = Key { time_ms: 0, parts: 1, size: Some(bytes.len() as u64) };
    let mut track_meta = Track::new(track, "raw");
    track_meta.keys.push(key);

    let mut meta = Meta::new(input_path.to_string());
    meta.tracks.insert(track, track_meta);

    let pages = media_api::paging::plan(&[key], PagePolicy::default());
    let last_ms = 0u64;

    let packet = Packet { track, time_ms: 0, is_key: true, data: bytes };
    let source = MemorySource::new(vec![packet]);
    Ok((source, meta, pages, last_ms, track))
}

fn page_region_name(stream_name: &StreamName, track: TrackId, first_key: u32) -> String {
    format!("/page_{}_{}_{}", stream_name.as_str().replace('/', "-"), track, first_key)
}

fn meta_region_name(stream_name: &StreamName, track: TrackId) -> String {
    format!("/meta_{}_{}", stream_name.as_str().replace('/', "-"), track)
}

async fn run_online_worker(cli: &Cli, stream_name: &str, input_path: &str) -> i32 {
    let stream_name = match StreamName::new(stream_name.to_string()) {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "invalid stream name");
            return exit_code::LOCK_HELD_OR_BAD_ARGS;
        }
    };

    let (source, meta, pages, last_ms, track) = match load_single_track(input_path).await {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "reading input");
            return exit_code::LOCK_HELD_OR_BAD_ARGS;
        }
    };

    let page_size = pages.values().next().map(|p| p.data_size).unwrap_or(0).max(1) as usize;
    let store = {
        let pages_stream = stream_name.clone();
        let meta_stream = stream_name.clone();
        SharedPageStore::new(
            move |track, first_key| {
                Ok(SharedRegion::create(&page_region_name(&pages_stream, track, first_key), page_size)?)
            },
            move |track| {
                Ok(SharedRegion::create(
                    &meta_region_name(&meta_stream, track),
                    META_SLOTS_PER_TRACK * META_SLOT_SIZE,
                )?)
            },
        )
    };

    if cli.push {
        run_stream_worker(&stream_name, source, store).await
    } else {
        run_serve_worker(&stream_name, source, store, meta, pages, last_ms, track).await
    }
}

async fn run_serve_worker(
    stream_name: &StreamName,
    source: MemorySource,
    store: SharedPageStore,
    meta: Meta,
    pages: BTreeMap<u32, Page>,
    last_ms: u64,
    track: TrackId,
) -> i32 {
    let mut tracks = HashMap::new();
    tracks.insert(track, (pages, last_ms));
    let cache = DemandCache::new(tracks, source, store);
    let mut serve = ServeLoop::new(cache, KeepRunningState::new(INPUT_TIMEOUT_SECS, header::unix_now() as u64));

    if let Err(e) = serve.prebuffer_first_keys(&[track]).await {
        error!(error = %e, "serve: prebuffering failed");
        return exit_code::LOCK_HELD_OR_BAD_ARGS;
    }

    let users_name = stream_name.users_shm_name();
    let users = match SharedRegion::create(&users_name, MAX_USER_RECORDS * USER_RECORD_SIZE) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "serve: opening user signal page failed");
            return exit_code::SPAWN_FAILURE;
        }
    };

    let biggest_fragment_ms = meta.tracks.get(&track).map(Track::biggest_fragment_ms).unwrap_or(0);
    let is_live = meta.tracks.get(&track).map(|t| t.live).unwrap_or(false);

    loop {
        let now_secs = header::unix_now() as u64;
        let requests: Vec<(TrackId, u32)> = users
            .as_slice()
            .chunks(USER_RECORD_SIZE)
            .flat_map(ServeLoop::<MemorySource, SharedPageStore>::decode_user_record)
            .collect();

        if let Err(e) = serve.tick(&requests, now_secs, true).await {
            error!(error = %e, "serve: tick failed");
            break;
        }
        if !serve.should_continue(now_secs, is_live, biggest_fragment_ms) {
            info!(%stream_name, "serve: idle timeout, shutting down");
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    let _ = serve.drain().await;
    utils::shm::unlink(&users_name);
    exit_code::CLEAN
}

struct NoBufferObserved;
impl stream::BufferProbe for NoBufferObserved {
    fn buffer_is_alive(&self) -> bool {
        false
    }
}

async fn run_stream_worker(stream_name: &StreamName, source: MemorySource, store: SharedPageStore) -> i32 {
    let pull_name = stream_name.pull_semaphore_name();
    match stream::run(&pull_name, &NoBufferObserved, source, &store, || true, || true).await {
        Ok(reason) => {
            info!(%stream_name, ?reason, "stream worker stopped");
            exit_code::CLEAN
        }
        Err(e) => {
            error!(error = %e, "stream worker failed");
            exit_code::LOCK_HELD_OR_BAD_ARGS
        }
    }
}
