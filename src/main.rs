use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use halo_voice::analysis::{AnalysisReport, LoopbackTrack, analyze};
use halo_voice::audio::CloseReason;
use halo_voice::audio::wav::decode_mono;
use halo_voice::cli::{Cli, Commands, ConfigAction};
use halo_voice::config::Config;
use owo_colors::OwoColorize;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);
    tracing::debug!(version = %halo_voice::version_string(), "starting halo");

    match cli.command {
        Commands::Analyze {
            wav,
            loopback,
            loopback_delay_ms,
        } => {
            let config = load_config(cli.config.as_deref())?;
            handle_analyze(
                &config,
                &wav,
                loopback.as_deref(),
                Duration::from_millis(loopback_delay_ms),
                cli.quiet,
            )?;
        }
        Commands::Devices => {
            list_audio_devices()?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "halo", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise the verbosity flags pick the level.
fn init_logging(quiet: bool, verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match (quiet, verbose) {
            (true, _) => "error",
            (false, 0) => "warn",
            (false, 1) => "halo_voice=debug,info",
            (false, _) => "halo_voice=trace,debug",
        };
        EnvFilter::new(level)
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/halo/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?
    } else {
        Config::load_or_default(&Config::default_path()?)?
    };

    Ok(config.with_env_overrides())
}

fn handle_analyze(
    config: &Config,
    wav: &Path,
    loopback: Option<&Path>,
    delay: Duration,
    quiet: bool,
) -> Result<()> {
    let sample_rate = config.audio.sample_rate;
    let samples = read_wav(wav, sample_rate)?;
    let loopback = loopback
        .map(|path| {
            read_wav(path, sample_rate).map(|samples| LoopbackTrack { samples, delay })
        })
        .transpose()?;
    let gated = loopback.is_some();

    let report = analyze(config, &samples, loopback)?;
    if quiet {
        for utterance in &report.utterances {
            println!(
                "{}\t{}\t{}",
                utterance.start.as_millis(),
                utterance.duration.as_millis(),
                utterance.gated_frames
            );
        }
    } else {
        print_report(&report, wav, gated);
    }
    Ok(())
}

fn read_wav(path: &Path, sample_rate: u32) -> Result<Vec<i16>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let samples = decode_mono(Box::new(std::io::BufReader::new(file)), sample_rate)
        .with_context(|| format!("Failed to decode {}", path.display()))?;
    Ok(samples)
}

fn print_report(report: &AnalysisReport, wav: &Path, gated: bool) {
    println!(
        "{} {} ({:.2}s, {} frames)",
        "Analyzed".bold(),
        wav.display(),
        report.duration.as_secs_f32(),
        report.stats.frames
    );

    if report.utterances.is_empty() {
        println!("  {}", "no utterances".dimmed());
    }
    for utterance in &report.utterances {
        let reason = match utterance.close_reason {
            CloseReason::Hangover => "hangover".green().to_string(),
            CloseReason::MaxLength => "max-length".yellow().to_string(),
            CloseReason::EndOfInput => "end-of-input".yellow().to_string(),
        };
        println!(
            "  #{:<3} {:>8.2}s  {:>6.2}s  {:>4} frames  rms {:.3}  {}",
            utterance.id,
            utterance.start.as_secs_f32(),
            utterance.duration.as_secs_f32(),
            utterance.frames,
            utterance.rms,
            reason
        );
        if utterance.gated_frames > 0 {
            println!(
                "        {}",
                format!("{} frames gated as loopback", utterance.gated_frames).cyan()
            );
        }
    }

    let stats = report.stats;
    println!(
        "{} speech frames: {}, gated: {}{}",
        "Summary".bold(),
        stats.speech_frames,
        stats.gated_frames,
        if gated { "" } else { " (no loopback given)" }
    );
}

/// List available audio devices.
#[cfg(feature = "cpal-audio")]
fn list_audio_devices() -> Result<()> {
    use halo_voice::audio::capture::{Direction, list_devices};

    for (label, direction) in [("input", Direction::Input), ("output", Direction::Output)] {
        let devices = list_devices(direction)?;
        if devices.is_empty() {
            println!("No audio {} devices found", label);
            continue;
        }
        println!("Available audio {} devices:", label);
        for (idx, device) in devices.iter().enumerate() {
            println!("  [{}] {}", idx, device);
        }
    }

    Ok(())
}

#[cfg(not(feature = "cpal-audio"))]
fn list_audio_devices() -> Result<()> {
    anyhow::bail!("halo was built without audio device support (enable the cpal-audio feature)")
}

/// Handle configuration commands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = match custom_path {
        Some(path) => path.to_path_buf(),
        None => Config::default_path()?,
    };

    match action {
        ConfigAction::Show { section } => {
            let config = Config::load_or_default(&config_path)?.with_env_overrides();
            match section.as_deref() {
                Some(section) => println!("{}", config.display_section(section)?),
                None => print!("{}", config.to_display_toml()?),
            }
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
        ConfigAction::Check => {
            let exists = config_path.exists();
            let config = Config::load_or_default(&config_path)?.with_env_overrides();
            if let Err(e) = config.validate() {
                eprintln!("{} {}", "Invalid:".red().bold(), e);
                std::process::exit(1);
            }
            if exists {
                println!("{} {}", "OK".green().bold(), config_path.display());
            } else {
                println!(
                    "{} {} (not found, defaults are valid)",
                    "OK".green().bold(),
                    config_path.display()
                );
            }
        }
    }
    Ok(())
}
