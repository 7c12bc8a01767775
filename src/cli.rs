use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use crate::{config::Config, controller::run_duration_from_secs};

/// dehydratord: closed-loop temperature control for a food dehydrator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file path (default: $DEHYDRATORD_CONFIG, ~/.config or /etc)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Detach from the terminal and run in the background
    #[arg(short = 'd', long = "daemonize")]
    pub daemonize: bool,

    /// Log regulation details
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Target chamber temperature in °C
    #[arg(short = 't', long = "target")]
    pub target: Option<f32>,

    /// Run length in seconds, 0 for no limit
    #[arg(long = "duration")]
    pub duration: Option<f64>,

    /// Fan cooldown in seconds after heating stops
    #[arg(long = "cooldown")]
    pub cooldown: Option<u32>,

    /// Print the effective configuration and exit
    #[arg(long = "print-config")]
    pub print_config: bool,
}

impl Cli {
    /// Applies command line overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut Config) -> Result<()> {
        if let Some(target) = self.target {
            config.program.target_temperature = target;
        }
        if let Some(duration) = self.duration {
            run_duration_from_secs(duration).context("Invalid --duration")?;
            config.program.run_duration_secs = duration;
        }
        if let Some(cooldown) = self.cooldown {
            config.program.cooldown_seconds = cooldown;
        }
        Ok(())
    }
}
