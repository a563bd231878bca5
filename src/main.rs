use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use offpeak_panel::config::{Config, TimezoneSource};
use offpeak_panel::display::TextPanel;
use offpeak_panel::health::{self, PanelMetrics};
use offpeak_panel::scheduler::{boot, SystemTimeSource};

/// Parse command line arguments
struct Args {
    once: bool,
    validate: bool,
    help: bool,
}

fn parse_args() -> Args {
    let mut result = Args {
        once: false,
        validate: false,
        help: false,
    };

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--once" => result.once = true,
            "--validate" => result.validate = true,
            "--help" | "-h" => result.help = true,
            _ => {}
        }
    }

    result
}

fn print_help() {
    println!("Off-peak panel - appliance start advice\n");
    println!("USAGE:");
    println!("    offpeak-panel [OPTIONS]\n");
    println!("OPTIONS:");
    println!("    --once              Render and dispatch a single tick and exit");
    println!("    --validate          Validate configuration and exit");
    println!("    --help, -h          Show this help message\n");
    println!("ENVIRONMENT:");
    println!("    OFF_PEAK_START_HOUR, OFF_PEAK_END_HOUR, MAX_CYCLE_DURATION_HOURS,");
    println!("    POLL_INTERVAL_SECS, TZ_TRANSITIONS or TZ_NAME, LOCALE,");
    println!("    HA_HOSTNAME, MQTT_SERVER, MQTT_TLS, HEALTH_PORT");
}

fn describe_timezone(source: &TimezoneSource) -> String {
    match source {
        TimezoneSource::Builtin => "built-in Brussels table".to_string(),
        TimezoneSource::Transitions(entries) => format!("{} configured transitions", entries.len()),
        TimezoneSource::Zone { tz, horizon_years } => {
            format!("{} over {} years", tz.name(), horizon_years)
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = parse_args();

    if args.help {
        print_help();
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("offpeak_panel=info".parse()?),
        )
        .init();

    info!("Off-peak panel v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!(
        "  Off-peak window: {}h to {}h, cycles up to {}h",
        config.off_peak_start_hour, config.off_peak_end_hour, config.max_cycle_duration_hours
    );
    info!("  Time zone: {}", describe_timezone(&config.timezone));
    info!("  Locale: {}", config.locale);
    info!("  Poll interval: {}s", config.poll_interval_secs);

    if args.validate {
        info!("Validating configuration...");
        match config.validate() {
            Ok(()) => {
                info!("Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    }

    let metrics = Arc::new(PanelMetrics::new());

    // Start health check server if configured
    let health_cancel = CancellationToken::new();
    if let Some(port) = config.health_port {
        let metrics = metrics.clone();
        let cancel = health_cancel.clone();
        tokio::spawn(async move {
            health::run_health_server(port, metrics, cancel).await;
        });
    }

    let mut context = boot(
        &config,
        SystemTimeSource,
        TextPanel::new(std::io::stdout()),
        metrics,
    )?;

    if args.once {
        info!("Running single tick (--once mode)");
        let result = context.tick().await;
        health_cancel.cancel();
        result.context("Tick failed")?;
        return Ok(());
    }

    let err = context.run().await;
    health_cancel.cancel();
    Err(err).context("Poll loop stopped")
}
