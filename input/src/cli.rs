//! Command-line surface for the `input` binary.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "input", about = "Media input worker: convert, serve, or stream a source")]
pub struct Cli {
    /// Print the capability descriptor and exit, without touching any lock.
    #[arg(long)]
    pub json: bool,

    /// Name of the stream to serve or push into.
    #[arg(long = "stream")]
    pub stream_name: Option<String>,

    /// With `--stream` and no output path, push packets into the stream
    /// instead of serving it on demand.
    #[arg(long)]
    pub push: bool,

    /// Input path, or '-' for stdin.
    pub input: Option<String>,

    /// Output path, or '-' for stdout.
    pub output: Option<String>,
}

/// Process exit codes, per the external interface contract.
pub mod exit_code {
    pub const CLEAN: i32 = 0;
    pub const LOCK_HELD_OR_BAD_ARGS: i32 = 1;
    pub const SPAWN_FAILURE: i32 = 2;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_parses_without_positional_args() {
        let cli = Cli::parse_from(["input", "--json"]);
        assert!(cli.json);
        assert!(cli.input.is_none());
    }

    #[test]
    fn stream_mode_parses_name_and_positionals() {
        let cli = Cli::parse_from(["input", "--stream", "live/cam1", "-", "-"]);
        assert_eq!(cli.stream_name.as_deref(), Some("live/cam1"));
        assert_eq!(cli.input.as_deref(), Some("-"));
        assert_eq!(cli.output.as_deref(), Some("-"));
    }
}
