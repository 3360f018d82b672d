//! Process-level configuration for the needle server: CLI argument parsing.

use std::path::PathBuf;

use clap::Parser;

/// Command-line arguments for the needle server.
#[derive(Debug, Clone, Parser)]
#[command(name = "needle", about = "A/B test assignment and reporting server")]
pub struct CliArgs {
    /// Directory containing defaults.yaml, experiments.yaml and kpis.yaml.
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Port to bind the HTTP server to.
    #[arg(short = 'p', long, default_value_t = 1212)]
    pub port: u16,

    /// Address to bind the HTTP server to.
    #[arg(short = 'b', long, default_value = "::")]
    pub bind: String,

    /// Enable verbose (info-level) logging.
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Enable debug-level logging.
    #[arg(short = 'D', long)]
    pub debug: bool,
}

impl CliArgs {
    /// The `tracing_subscriber::EnvFilter` directive implied by the verbosity flags,
    /// least to most verbose: default < `--verbose` < `--debug`.
    pub fn log_directive(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.verbose {
            "info"
        } else {
            "warn"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_source_cli() {
        let args = CliArgs::parse_from(["needle"]);
        assert_eq!(args.port, 1212);
        assert_eq!(args.bind, "::");
        assert!(!args.verbose);
        assert!(!args.debug);
        assert_eq!(args.log_directive(), "warn");
    }

    #[test]
    fn debug_flag_wins_over_verbose() {
        let args = CliArgs::parse_from(["needle", "-v", "-D"]);
        assert_eq!(args.log_directive(), "debug");
    }

    #[test]
    fn positional_dir_and_short_flags_parse() {
        let args = CliArgs::parse_from(["needle", "/etc/needle", "-p", "9000", "-b", "127.0.0.1"]);
        assert_eq!(args.dir, PathBuf::from("/etc/needle"));
        assert_eq!(args.port, 9000);
        assert_eq!(args.bind, "127.0.0.1");
    }
}
