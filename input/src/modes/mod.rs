//! The three ways an input worker can be invoked: offline `convert`,
//! on-demand `serve`, and push-mode `stream`.

pub mod convert;
pub mod serve;
pub mod stream;

use serde_json::{json, Value};

/// Machine-readable capability descriptor, printed by `--json` before any
/// lock is taken or file is touched.
pub fn capabilities() -> Value {
    json!({
        "name": "input",
        "options": {
            "json": { "long": "json", "help": "Print this capability descriptor and exit" },
            "streamname": { "long": "stream", "help": "Name of the stream to serve or push into" },
            "input": { "type": "positional", "help": "Input path, or '-' for stdin" },
            "output": { "type": "positional", "help": "Output path, or '-' for stdout" },
        },
    })
}

/// Tracks whether the `serve`/`stream` loop should keep running: true while
/// the process is active and either the generic idle timeout hasn't
/// elapsed, or (for a live source) the stream-specific grace window based
/// on its largest fragment hasn't elapsed.
pub struct KeepRunningState {
    active: bool,
    last_activity_secs: u64,
    input_timeout_secs: u64,
}

impl KeepRunningState {
    pub fn new(input_timeout_secs: u64, now_secs: u64) -> Self {
        KeepRunningState {
            active: true,
            last_activity_secs: now_secs,
            input_timeout_secs,
        }
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Reset the idle clock. Called once per tick whenever at least one
    /// connected user is present and the stream has at least one track.
    pub fn touch(&mut self, now_secs: u64, has_users: bool, has_tracks: bool) {
        if has_users && has_tracks {
            self.last_activity_secs = now_secs;
        }
    }

    pub fn keep_running(&self, now_secs: u64, is_live: bool, biggest_fragment_ms: u64) -> bool {
        if !self.active {
            return false;
        }
        let idle_secs = now_secs.saturating_sub(self.last_activity_secs);
        if idle_secs < self.input_timeout_secs {
            return true;
        }
        if is_live {
            let grace_secs = biggest_fragment_ms / 500;
            if idle_secs < grace_secs {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_alive_within_the_generic_timeout() {
        let state = KeepRunningState::new(30, 1_000);
        assert!(state.keep_running(1_010, false, 0));
    }

    #[test]
    fn dies_after_timeout_when_not_live() {
        let state = KeepRunningState::new(30, 1_000);
        assert!(!state.keep_running(1_040, false, 0));
    }

    #[test]
    fn live_stream_gets_a_fragment_based_grace_window() {
        let state = KeepRunningState::new(30, 1_000);
        // biggest fragment 10_000ms -> 20s grace beyond the 30s timeout
        assert!(state.keep_running(1_045, true, 10_000));
        assert!(!state.keep_running(1_060, true, 10_000));
    }

    #[test]
    fn touch_resets_the_clock_only_with_users_and_tracks() {
        let mut state = KeepRunningState::new(30, 1_000);
        state.touch(1_020, false, true);
        assert!(!state.keep_running(1_060, false, 0));

        let mut state = KeepRunningState::new(30, 1_000);
        state.touch(1_020, true, true);
        assert!(state.keep_running(1_045, false, 0));
    }

    #[test]
    fn deactivate_ends_it_immediately() {
        let mut state = KeepRunningState::new(30, 1_000);
        state.deactivate();
        assert!(!state.keep_running(1_000, false, 0));
    }
}
