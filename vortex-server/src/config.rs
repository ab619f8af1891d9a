//! Command-line flags with environment-variable fallbacks, mirroring the
//! host crate family's `#[arg(long, env = "...")]` `Args` struct pattern.

use clap::Parser;

const MIN_INTERVAL: u64 = 60;
const MAX_INTERVAL: u64 = 86_400;
const MAX_KEEP: usize = 364;

/// Vortex server command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "vortex-server")]
#[command(about = "Networked in-memory key/value cache with watcher fan-out and rotational durability")]
#[command(version, disable_version_flag = true)]
pub struct Args {
    /// Print version and exit.
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    pub version: (),

    /// Listen port.
    #[arg(short = 'p', long, env = "VORTEX_PORT", default_value_t = 56000)]
    pub port: u16,

    /// Application log level, 0 (quiet) through 8 (trace).
    #[arg(short = 'l', long, env = "VORTEX_LOG_LEVEL", default_value_t = 4)]
    pub log_level: u8,

    /// Console log level, 0 (quiet) through 8 (trace).
    #[arg(short = 'L', long, env = "VORTEX_CONSOLE_LOG_LEVEL", default_value_t = 4)]
    pub console_log_level: u8,

    /// Rotation interval in seconds, clamped to 60..=86400.
    #[arg(short = 'i', long, env = "VORTEX_INTERVAL", default_value_t = 86_400)]
    pub interval: u64,

    /// Number of retained rotated journal segments, clamped to 0..=364.
    #[arg(short = 'k', long, env = "VORTEX_KEEP", default_value_t = 6)]
    pub keep: u64,

    /// Optional peer address (`host:port`) to mirror mutations to.
    #[arg(short = 'c', long, env = "VORTEX_PEER")]
    pub peer: Option<String>,

    /// Instance name used in the startup banner and logs.
    #[arg(short = 'n', long, env = "VORTEX_NAME", default_value = "vortex")]
    pub name: String,
}

impl Args {
    /// Clamps `interval` and `keep` to their documented bounds, logging a
    /// warning when a clamp actually fires. Matches the original's
    /// silent-clamp behavior except for the added warning.
    pub fn clamped(mut self) -> Self {
        let original_interval = self.interval;
        self.interval = self.interval.clamp(MIN_INTERVAL, MAX_INTERVAL);
        if self.interval != original_interval {
            tracing::warn!(
                requested = original_interval,
                clamped = self.interval,
                "rotation interval out of bounds; clamped"
            );
        }

        let original_keep = self.keep;
        self.keep = self.keep.min(MAX_KEEP as u64);
        if self.keep != original_keep {
            tracing::warn!(
                requested = original_keep,
                clamped = self.keep,
                "journal retention count out of bounds; clamped"
            );
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Args {
        Args {
            version: (),
            port: 56000,
            log_level: 4,
            console_log_level: 4,
            interval: 86_400,
            keep: 6,
            peer: None,
            name: "vortex".to_string(),
        }
    }

    #[test]
    fn interval_below_minimum_is_clamped_up() {
        let args = Args {
            interval: 10,
            ..base()
        }
        .clamped();
        assert_eq!(args.interval, MIN_INTERVAL);
    }

    #[test]
    fn interval_above_maximum_is_clamped_down() {
        let args = Args {
            interval: 1_000_000,
            ..base()
        }
        .clamped();
        assert_eq!(args.interval, MAX_INTERVAL);
    }

    #[test]
    fn keep_above_maximum_is_clamped_down() {
        let args = Args {
            keep: 9000,
            ..base()
        }
        .clamped();
        assert_eq!(args.keep, MAX_KEEP as u64);
    }

    #[test]
    fn in_bounds_values_pass_through_unchanged() {
        let args = base().clamped();
        assert_eq!(args.interval, 86_400);
        assert_eq!(args.keep, 6);
    }
}
