//! Reference clock monitor.
//!
//! Loads a [`LiveSyncConfig`], follows the configured timecode reference
//! and prints the synchronized present time once per tick.
//!
//! # Usage
//!
//! ```sh
//! livesync --config livesync.toml --ntp time.google.com --rate 30000/1001 --drop-frame --ticks 300
//! ```
//!
//! Without `--ticks` the loop runs until the process is interrupted. Logs go
//! to stderr so stdout carries only timecodes.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use livesync::config::{ConfigError, LiveSyncConfig, ReferenceKind};
use livesync::reference::{
    LtcTimecodeSource, NtpTimecodeSource, ReferenceError, SystemClockSource, TimecodeSource,
};
use livesync::source::{Registrable, SourceId};
use livesync::sync::{FreeRunClock, Genlock, Synchronizer};
use livesync::time::{FrameRate, TimeError};

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Time(#[from] TimeError),

    #[error(transparent)]
    Reference(#[from] ReferenceError),
}

#[derive(Debug, Default)]
struct Args {
    config: Option<String>,
    ntp: Option<String>,
    rate: Option<(u32, u32)>,
    drop_frame: bool,
    ticks: Option<u64>,
    verbose: bool,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("livesync: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let args: Vec<String> = std::env::args().collect();
    let args = parse_args(&args)?;
    if args.verbose {
        livesync::init_tracing_with("livesync=debug");
    } else {
        livesync::init_tracing();
    }

    let mut config = match &args.config {
        Some(path) => LiveSyncConfig::from_file(path)?,
        None => LiveSyncConfig::default(),
    };
    if let Some(server) = args.ntp {
        config.reference.kind = ReferenceKind::Ntp;
        config.reference.ntp_server = server;
    }
    if let Some((numerator, denominator)) = args.rate {
        config.reference.frame_rate.numerator = numerator;
        config.reference.frame_rate.denominator = denominator;
        config.reference.frame_rate.drop_frame = args.drop_frame;
    }
    config.validate()?;

    let rate = config.reference_rate()?;
    let reference = build_reference(&config, rate)?;
    eprintln!(
        "livesync: following {} at {rate}",
        reference.friendly_name()
    );

    let mut synchronizer = Synchronizer::new();
    synchronizer.set_reference(Some(reference));

    let mut genlock = if config.genlock.enabled {
        let mut genlock = Genlock::new(FreeRunClock::new(config.sync_rate()?));
        genlock.start();
        Some(genlock)
    } else {
        None
    };

    let tick = Duration::from_secs_f64(rate.frame_interval());
    let mut count = 0u64;
    while args.ticks.is_none_or(|ticks| count < ticks) {
        let now = match genlock.as_mut() {
            Some(genlock) => {
                genlock.wait_for_next_pulse();
                synchronizer.update_with_genlock(genlock)
            }
            None => {
                std::thread::sleep(tick);
                synchronizer.update()
            }
        };
        match now {
            Some(now) => println!("{}", now.to_timecode()),
            None => println!("--:--:--:--"),
        }
        count += 1;
    }

    if let Some(mut genlock) = genlock {
        genlock.stop();
    }
    Ok(())
}

fn build_reference(
    config: &LiveSyncConfig,
    rate: FrameRate,
) -> Result<Arc<dyn TimecodeSource>, CliError> {
    Ok(match config.reference.kind {
        ReferenceKind::Ntp => Arc::new(
            NtpTimecodeSource::new(
                SourceId::generate(),
                config.reference.ntp_server.clone(),
                config.reference.ntp_server.clone(),
            )
            .with_frame_rate(rate),
        ),
        ReferenceKind::Ltc => {
            eprintln!("livesync: no audio input is attached; LTC will report no timecode");
            Arc::new(LtcTimecodeSource::new(
                SourceId::generate(),
                "LTC",
                rate,
                config.reference.ltc_sample_rate,
            )?)
        }
        ReferenceKind::None => Arc::new(SystemClockSource::new(
            SourceId::generate(),
            "local",
            rate,
        )),
    })
}

fn parse_args(args: &[String]) -> Result<Args, CliError> {
    let mut parsed = Args::default();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                parsed.config = Some(value(args, i, "--config")?.to_owned());
            }
            "--ntp" => {
                i += 1;
                parsed.ntp = Some(value(args, i, "--ntp")?.to_owned());
            }
            "--rate" | "-r" => {
                i += 1;
                parsed.rate = Some(parse_rate(value(args, i, "--rate")?)?);
            }
            "--drop-frame" => parsed.drop_frame = true,
            "--verbose" | "-v" => parsed.verbose = true,
            "--ticks" | "-n" => {
                i += 1;
                let text = value(args, i, "--ticks")?;
                parsed.ticks = Some(
                    text.parse()
                        .map_err(|_| CliError::Usage(format!("invalid tick count \"{text}\"")))?,
                );
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => return Err(CliError::Usage(format!("unknown argument \"{other}\""))),
        }
        i += 1;
    }
    Ok(parsed)
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, CliError> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| CliError::Usage(format!("missing value for {flag}")))
}

/// Parses `24` or `30000/1001`.
fn parse_rate(text: &str) -> Result<(u32, u32), CliError> {
    let invalid = || CliError::Usage(format!("invalid frame rate \"{text}\""));
    let (numerator, denominator) = text.split_once('/').unwrap_or((text, "1"));
    Ok((
        numerator.trim().parse().map_err(|_| invalid())?,
        denominator.trim().parse().map_err(|_| invalid())?,
    ))
}

fn print_usage() {
    println!("Usage: livesync [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config <FILE>   TOML configuration file");
    println!("      --ntp <HOST>      Follow an NTP server");
    println!("  -r, --rate <N[/D]>    Reference frame rate, e.g. 30000/1001");
    println!("      --drop-frame      Use drop-frame timecode with --rate");
    println!("  -n, --ticks <N>       Stop after N ticks");
    println!("  -v, --verbose         Debug logging unless LIVESYNC_LOG or RUST_LOG is set");
    println!("  -h, --help            Show this help");
}
