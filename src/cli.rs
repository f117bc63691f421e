//! Command-line interface definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "echolog",
    version,
    about = "Autonomous ultrasonic bat-call recorder"
)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the recorder (default).
    Run,
    /// List available audio input devices.
    Devices,
    /// Print solar event times for a position and date.
    Solar {
        /// Latitude in decimal degrees (defaults to the configured value).
        #[arg(long)]
        latitude: Option<f64>,
        /// Longitude in decimal degrees (defaults to the configured value).
        #[arg(long)]
        longitude: Option<f64>,
        /// Date as YYYY-MM-DD (defaults to today).
        #[arg(long)]
        date: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_bare_invocation() {
        let cli = Cli::try_parse_from(["echolog"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn cli_parses_solar_subcommand() {
        let cli = Cli::try_parse_from([
            "echolog",
            "solar",
            "--latitude",
            "57.66",
            "--longitude",
            "12.64",
            "--date",
            "2024-06-21",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Solar {
                latitude,
                longitude,
                date,
            }) => {
                assert_eq!(latitude, Some(57.66));
                assert_eq!(longitude, Some(12.64));
                assert_eq!(date.as_deref(), Some("2024-06-21"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn cli_accepts_global_config_flag() {
        let cli = Cli::try_parse_from(["echolog", "--config", "/tmp/echolog.toml", "devices"])
            .unwrap();
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/echolog.toml")));
        assert!(matches!(cli.command, Some(Commands::Devices)));
    }
}
