//! Command-line interface for halo
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Turn-taking voice assistant front end
#[derive(Parser, Debug)]
#[command(name = "halo", version, about = "Turn-taking voice assistant front end")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug logs, -vv: trace logs)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Segment a recording and report every utterance
    Analyze {
        /// Microphone recording (16-bit WAV, any rate or channel count)
        wav: PathBuf,

        /// Audio played through the speaker during the recording
        #[arg(long, value_name = "WAV")]
        loopback: Option<PathBuf>,

        /// Milliseconds into the recording at which the loopback audio started
        #[arg(long, value_name = "MS", default_value = "0", requires = "loopback")]
        loopback_delay_ms: u64,
    },

    /// List available audio input and output devices
    Devices,

    /// View and check configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration (optionally one section)
    Show {
        /// Config section to show (e.g., gate, vad, conversation)
        section: Option<String>,
    },
    /// Print the configuration file path
    Path,
    /// Validate the configuration file
    Check,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_analyze_defaults() {
        let cli = Cli::try_parse_from(["halo", "analyze", "mic.wav"]).unwrap();
        match cli.command {
            Commands::Analyze {
                wav,
                loopback,
                loopback_delay_ms,
            } => {
                assert_eq!(wav, PathBuf::from("mic.wav"));
                assert!(loopback.is_none());
                assert_eq!(loopback_delay_ms, 0);
            }
            other => panic!("Expected Analyze command, got {:?}", other),
        }
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_analyze_with_loopback() {
        let cli = Cli::try_parse_from([
            "halo",
            "analyze",
            "mic.wav",
            "--loopback",
            "played.wav",
            "--loopback-delay-ms",
            "250",
        ])
        .unwrap();
        match cli.command {
            Commands::Analyze {
                loopback,
                loopback_delay_ms,
                ..
            } => {
                assert_eq!(loopback, Some(PathBuf::from("played.wav")));
                assert_eq!(loopback_delay_ms, 250);
            }
            other => panic!("Expected Analyze command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_delay_requires_loopback() {
        let result =
            Cli::try_parse_from(["halo", "analyze", "mic.wav", "--loopback-delay-ms", "250"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_analyze_requires_wav() {
        assert!(Cli::try_parse_from(["halo", "analyze"]).is_err());
    }

    #[test]
    fn test_parse_requires_subcommand() {
        assert!(Cli::try_parse_from(["halo"]).is_err());
    }

    #[test]
    fn test_parse_devices() {
        let cli = Cli::try_parse_from(["halo", "devices"]).unwrap();
        assert!(matches!(cli.command, Commands::Devices));
    }

    #[test]
    fn test_parse_verbose_double() {
        let cli = Cli::try_parse_from(["halo", "-vv", "devices"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_verbose_repeated_flags() {
        let cli = Cli::try_parse_from(["halo", "devices", "-v", "-v"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_config_show_section() {
        let cli = Cli::try_parse_from(["halo", "config", "show", "gate"]).unwrap();
        match cli.command {
            Commands::Config {
                action: ConfigAction::Show { section },
            } => assert_eq!(section.as_deref(), Some("gate")),
            other => panic!("Expected config show, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_config_check_with_global_path() {
        let cli =
            Cli::try_parse_from(["halo", "config", "check", "--config", "/tmp/halo.toml"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Check
            }
        ));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/halo.toml")));
    }

    #[test]
    fn test_parse_completions() {
        let cli = Cli::try_parse_from(["halo", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions { shell: Shell::Bash }
        ));
    }

    #[test]
    fn test_parse_config_path() {
        let cli = Cli::try_parse_from(["halo", "config", "path"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Path
            }
        ));
    }
}
