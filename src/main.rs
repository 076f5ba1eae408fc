use clap::Parser;
use envlogger::cli::Cli;
use tracing::{Level, error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Keep the guard alive so buffered log lines are flushed on exit
    let _guard = setup_logging(&cli);
    info!("Starting envlogger");
    if cli.port.is_some() {
        info!("Ignoring --port, the sensor is always read from I2C bus 1");
    }

    if let Err(e) = envlogger::get_data(
        cli.api.as_deref(),
        cli.lat,
        cli.lon,
        &cli.file,
        &cli.address,
    ) {
        error!("Acquisition failed: {}", e);
        eprintln!("Acquisition failed: {}", e);
        return Err(Box::new(e));
    }

    info!("Reading saved to {}", cli.file.display());
    Ok(())
}

fn setup_logging(cli: &Cli) -> WorkerGuard {
    // File-based logging with daily rotation
    let file_appender = rolling::daily(&cli.log_dir, "envlogger.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    fmt()
        .with_writer(non_blocking)
        .with_ansi(false) // Disable ANSI colors in log files
        .with_level(true)
        .with_max_level(level)
        .init();
    guard
}
