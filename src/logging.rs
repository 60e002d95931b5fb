//! Tracing subscriber setup for the binary.
//!
//! Logs go to stderr so stdout stays clean for results. `FAMILY_TREE_LOG` takes an
//! `EnvFilter` directive and wins over the `-v` count.

use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "FAMILY_TREE_LOG";

fn default_directive(verbosity: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbosity {
        0 => "warn",
        1 => "family_tree_cli=info,warn",
        2 => "family_tree_cli=debug,info",
        _ => "trace",
    }
}

/// Install the global subscriber. Safe to call more than once; later calls are ignored.
pub fn init(verbosity: u8, quiet: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity, quiet)));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbosity >= 2)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_wins_over_verbosity() {
        assert_eq!(default_directive(3, true), "error");
        assert_eq!(default_directive(0, false), "warn");
        assert_eq!(default_directive(9, false), "trace");
    }
}
