use std::fs::File;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use daemonize::Daemonize;
use log::{LevelFilter, error, info};
use syslog::{BasicLogger, Facility, Formatter3164};

use dehydratord::{application::Application, cli::Cli, config::ConfigManager};

fn init_log(verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    syslog::unix(Formatter3164 {
        facility: Facility::LOG_USER,
        hostname: None,
        process: "dehydratord".into(),
        pid: std::process::id(),
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|()| log::set_max_level(level))
            .map_err(|e| anyhow!("{e}"))
    })
}

fn into_daemon() -> Result<()> {
    File::create("/var/tmp/dehydratord.log")
        .and_then(|out| Ok((out.try_clone()?, out)))
        .map_err(|e| anyhow!("{e}"))
        .and_then(|(stderr, stdout)| {
            Daemonize::new()
                .stdout(stdout)
                .stderr(stderr)
                .start()
                .map_err(|e| anyhow!("{e}"))
        })
}

async fn run(cli: Cli) -> Result<()> {
    let config_manager = ConfigManager::load_or_default(cli.config.clone()).await?;

    let mut config = config_manager.clone_config().await;
    cli.apply_overrides(&mut config)?;
    config_manager
        .update_config(config)
        .await
        .context("Invalid command line overrides")?;

    if cli.print_config {
        let yaml = serde_yaml::to_string(&*config_manager.get().await)
            .context("Failed to serialize configuration")?;
        print!("{yaml}");
        return Ok(());
    }

    Application::builder()
        .with_config_manager(config_manager)
        .build()?
        .run()
        .await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if !cli.print_config {
        if let Err(e) = init_log(cli.verbose) {
            eprintln!("dehydratord: syslog unavailable ({e}), continuing without logging");
        }
    }

    // fork before the runtime starts its worker threads
    if cli.daemonize {
        into_daemon()?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;

    let result = runtime.block_on(run(cli));
    match &result {
        Ok(()) => info!("dehydratord exited"),
        Err(e) => error!("dehydratord failed: {e:#}"),
    }
    result
}
