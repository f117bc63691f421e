use anyhow::Result;
use chrono::NaiveDate;
use clap::Parser;
use echolog::app::{App, LogOnlyControl};
use echolog::cli::{Cli, Commands};
use echolog::config::Config;
use echolog::gps::NoGps;
use owo_colors::OwoColorize;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_recorder(config),
        Commands::Devices => list_devices(),
        Commands::Solar {
            latitude,
            longitude,
            date,
        } => print_solar(&config, latitude, longitude, date),
    }
}

#[cfg(feature = "cpal-audio")]
fn run_recorder(config: Config) -> Result<()> {
    use echolog::audio::capture::{CaptureConfig, CpalAudioSource};

    tracing::info!(version = %echolog::version_string(), "starting echolog");

    if config.recorder.pettersson_m500 {
        // The M500 control-protocol source needs a deployment-provided USB
        // transport; as a standard audio-class device it still records
        // through cpal.
        tracing::warn!(
            "pettersson_m500 is set but no USB transport is wired; using the audio-class path"
        );
    }

    let capture = CaptureConfig {
        device_name_contains: config.recorder.device_name_contains.clone(),
        sample_rate_hz: config.recorder.in_sampling_rate_hz,
        channels: config.recorder.channels,
    };
    let audio_factory: echolog::app::AudioFactory =
        Box::new(move || Box::new(CpalAudioSource::new(capture.clone())));

    let app = App::new(
        config,
        Arc::new(NoGps),
        Arc::new(LogOnlyControl),
        audio_factory,
    );
    app.run();
    Ok(())
}

#[cfg(not(feature = "cpal-audio"))]
fn run_recorder(_config: Config) -> Result<()> {
    anyhow::bail!("this build has no capture backend; rebuild with the cpal-audio feature")
}

#[cfg(feature = "cpal-audio")]
fn list_devices() -> Result<()> {
    let devices = echolog::audio::capture::list_input_devices()?;
    if devices.is_empty() {
        println!("No audio input devices found.");
        return Ok(());
    }
    println!("{}", "Audio input devices:".bold());
    for name in devices {
        println!("  {}", name);
    }
    Ok(())
}

#[cfg(not(feature = "cpal-audio"))]
fn list_devices() -> Result<()> {
    anyhow::bail!("this build has no capture backend; rebuild with the cpal-audio feature")
}

fn print_solar(
    config: &Config,
    latitude: Option<f64>,
    longitude: Option<f64>,
    date: Option<String>,
) -> Result<()> {
    let latitude = latitude.unwrap_or(config.scheduler.latitude);
    let longitude = longitude.unwrap_or(config.scheduler.longitude);
    let date = match date {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")?,
        None => chrono::Local::now().date_naive(),
    };

    let calculator = echolog::scheduler::SolarCalculator::new();
    let times = calculator.solar_times_local(latitude, longitude, date)?;

    println!("{}", format!("Solar times for {}", date).bold());
    println!("  Latitude:  {:.4}", latitude);
    println!("  Longitude: {:.4}", longitude);
    println!("  Dawn:      {}", times.dawn.format("%H:%M"));
    println!("  Sunrise:   {}", times.sunrise.format("%H:%M"));
    println!("  Sunset:    {}", times.sunset.format("%H:%M"));
    println!("  Dusk:      {}", times.dusk.format("%H:%M"));
    Ok(())
}
