//! acme-telemetry CLI
//!
//! Weather-station and activity telemetry backend.

use acme_telemetry::{
    config::Config,
    core::{
        aggregate, aggregation::format_date, evaluate_activity, format_value,
        group_by_sensor_type, group_by_station, RecencyWindow,
    },
    model::{AccelerationReading, LogEntry, RawLogStore},
    simulator,
    store::{FileStore, TelemetryRepository},
    VERSION,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[cfg(feature = "hub")]
use acme_telemetry::BlockingHubClient;

#[derive(Parser)]
#[command(name = "acme-telemetry")]
#[command(version = VERSION)]
#[command(about = "Weather-station and activity telemetry backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API until Ctrl+C
    Serve {
        /// Address to bind to (defaults to the configured host)
        #[arg(long)]
        host: Option<IpAddr>,

        /// Port to listen on (defaults to the configured port)
        #[arg(long)]
        port: Option<u16>,

        /// Relay simulated logs to the IoT hub (requires hub feature)
        #[arg(long)]
        relay: bool,

        /// Disable background simulated transmissions
        #[arg(long)]
        no_simulation: bool,
    },

    /// Classify two accelerometer readings given as x,y,z
    Classify {
        /// First reading, e.g. 0,0,9.8
        #[arg(allow_hyphen_values = true)]
        first: String,

        /// Second reading
        #[arg(allow_hyphen_values = true)]
        second: String,
    },

    /// Print grouped log views
    Aggregate {
        /// Read a station tree from this JSON file instead of the store
        #[arg(long, short)]
        input: Option<PathBuf>,

        /// Which view to print
        #[arg(long, value_enum, default_value = "all")]
        view: View,
    },

    /// Simulate a transmission from every sensor
    Simulate {
        /// Keep transmitting until Ctrl+C
        #[arg(long)]
        watch: bool,

        /// Seconds between transmissions with --watch
        #[arg(long)]
        interval: Option<u64>,

        /// Relay logs to the IoT hub before storing them (requires hub feature)
        #[arg(long)]
        relay: bool,
    },

    /// Create the demo stations and sensors
    Seed,

    /// List stored activity records
    Activity,

    /// Show configuration, or update it with --set
    Config {
        /// Set a field and save, e.g. --set port=9000 (repeatable)
        #[arg(long, value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum View {
    Station,
    Sensor,
    All,
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config ({e}), using defaults");
            Config::default()
        }
    };
    init_tracing(&config);

    match cli.command {
        Commands::Serve {
            host,
            port,
            relay,
            no_simulation,
        } => {
            cmd_serve(&config, host, port, relay, no_simulation);
        }
        Commands::Classify { first, second } => {
            cmd_classify(&config, &first, &second);
        }
        Commands::Aggregate { input, view } => {
            cmd_aggregate(&config, input, view);
        }
        Commands::Simulate {
            watch,
            interval,
            relay,
        } => {
            cmd_simulate(&config, watch, interval, relay);
        }
        Commands::Seed => {
            cmd_seed(&config);
        }
        Commands::Activity => {
            cmd_activity(&config);
        }
        Commands::Config { set } => {
            cmd_config(config, &set);
        }
    }
}

/// Log to stderr, filtered by `RUST_LOG` or the configured level.
fn init_tracing(config: &Config) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(feature = "server")]
fn cmd_serve(
    config: &Config,
    host: Option<IpAddr>,
    port: Option<u16>,
    relay: bool,
    no_simulation: bool,
) {
    use acme_telemetry::server::{run, ServerConfig};

    let simulation = if no_simulation {
        None
    } else {
        config.simulation_period()
    };
    let server_config = ServerConfig::new(port.unwrap_or(config.port), open_repository(config))
        .with_host(host.unwrap_or(config.host))
        .with_timezone(timezone(config))
        .with_relay(relay || config.relay_to_hub)
        .with_simulation(simulation);

    println!("acme-telemetry v{VERSION}");
    println!();
    println!("  Store: {:?}", config.store_path());
    println!("  Time zone: {}", config.timezone);
    println!(
        "  Hub relay: {}",
        if server_config.relay_to_hub {
            "enabled"
        } else {
            "disabled"
        }
    );
    match simulation {
        Some(period) => println!("  Simulation: every {}s", period.as_secs()),
        None => println!("  Simulation: disabled"),
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error creating runtime: {e}");
            std::process::exit(1);
        }
    };

    runtime.block_on(async {
        let (addr, shutdown_tx) = match run(server_config).await {
            Ok(server) => server,
            Err(e) => {
                eprintln!("Error starting server: {e}");
                std::process::exit(1);
            }
        };

        println!("  Listening on http://{addr}");
        println!();
        println!("Press Ctrl+C to stop");

        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("Error waiting for Ctrl+C: {e}");
        }

        println!();
        println!("Shutting down...");
        let _ = shutdown_tx.send(());
    });
}

#[cfg(not(feature = "server"))]
fn cmd_serve(
    _config: &Config,
    _host: Option<IpAddr>,
    _port: Option<u16>,
    _relay: bool,
    _no_simulation: bool,
) {
    eprintln!("Error: serve requires the server feature");
    std::process::exit(1);
}

fn cmd_classify(config: &Config, first: &str, second: &str) {
    let readings = match (parse_reading(first), parse_reading(second)) {
        (Ok(first), Ok(second)) => [first, second],
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    match evaluate_activity(&readings, &now(config)) {
        Ok(classification) => print_json(&classification),
        Err(e) => {
            eprintln!("Error: {e} ({})", e.code());
            std::process::exit(1);
        }
    }
}

/// Parse `x,y,z`. An empty component is a missing coordinate.
fn parse_reading(text: &str) -> Result<AccelerationReading, String> {
    let parts: Vec<&str> = text.split(',').map(str::trim).collect();
    let [x, y, z] = parts.as_slice() else {
        return Err(format!("expected x,y,z but got {text:?}"));
    };

    let coordinate = |part: &str| -> Result<Option<f64>, String> {
        if part.is_empty() {
            return Ok(None);
        }
        part.parse()
            .map(Some)
            .map_err(|_| format!("invalid coordinate {part:?} in {text:?}"))
    };

    Ok(AccelerationReading {
        x: coordinate(x)?,
        y: coordinate(y)?,
        z: coordinate(z)?,
    })
}

fn cmd_aggregate(config: &Config, input: Option<PathBuf>, view: View) {
    let tree = match input {
        Some(path) => read_snapshot(&path),
        None => match open_repository(config).weather_stations() {
            Ok(tree) => tree,
            Err(e) => {
                eprintln!("Error reading store: {e}");
                std::process::exit(1);
            }
        },
    };

    let now = now(config);
    match view {
        View::Station => {
            print_json(&group_by_station(&tree, &now));
            eprintln!("{}", RecencyWindow::CalendarDay.describe());
        }
        View::Sensor => {
            print_json(&group_by_sensor_type(&tree, &now));
            eprintln!("{}", RecencyWindow::ClockHour.describe());
        }
        View::All => print_json(&aggregate(&tree, &now)),
    }
}

fn read_snapshot(path: &Path) -> RawLogStore {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error reading {path:?}: {e}");
            std::process::exit(1);
        }
    };
    match serde_json::from_str(&content) {
        Ok(value) => RawLogStore::from_value(value),
        Err(e) => {
            eprintln!("Error parsing {path:?}: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_simulate(config: &Config, watch: bool, interval: Option<u64>, relay: bool) {
    let repository = open_repository(config);
    let relay = relay || config.relay_to_hub;

    #[cfg(feature = "hub")]
    let hub = if relay {
        match BlockingHubClient::new() {
            Ok(client) => Some(client),
            Err(e) => {
                eprintln!("Error creating hub client: {e}");
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    #[cfg(not(feature = "hub"))]
    if relay {
        eprintln!("Warning: relay ignored (hub feature not enabled at compile time)");
    }

    let transmit = || {
        let now = now(config);
        #[cfg(feature = "hub")]
        if let Some(ref hub) = hub {
            return simulator::simulate_transmission_with(&repository, &now, |id, sensor, log| {
                hub.relay_log(id, sensor, log)
            });
        }
        simulator::simulate_transmission(&repository, &now)
    };

    if !watch {
        match transmit() {
            Ok(logs) => print_logs(config, &logs),
            Err(e) => {
                eprintln!("Error storing logs: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let period = Duration::from_secs(
        interval
            .unwrap_or(config.simulation_interval.as_secs())
            .max(1),
    );
    println!("Transmitting every {}s", period.as_secs());
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    while running.load(Ordering::SeqCst) {
        match transmit() {
            Ok(logs) => print_logs(config, &logs),
            Err(e) => eprintln!("Error storing logs: {e}"),
        }

        let started = Instant::now();
        while running.load(Ordering::SeqCst) && started.elapsed() < period {
            thread::sleep(Duration::from_millis(100));
        }
    }

    println!();
    println!("Stopped.");
}

fn print_logs(config: &Config, logs: &BTreeMap<String, LogEntry>) {
    let now = now(config);
    println!("[{}] Stored {} log(s)", now.format("%H:%M:%S"), logs.len());
    for log in logs.values() {
        println!(
            "  {:<24} {}",
            log.sensor_name,
            format_value(log.value, log.sensor_type.as_deref().unwrap_or(""))
        );
    }
}

fn cmd_seed(config: &Config) {
    match open_repository(config).seed_demo() {
        Ok(tree) => {
            for (station_id, station) in &tree.stations {
                println!("{} ({station_id})", station.display_name(station_id));
                for (sensor_id, sensor) in &station.sensors {
                    println!(
                        "  {:<24} {}",
                        sensor.name.as_deref().unwrap_or(sensor_id),
                        sensor.sensor_type.as_deref().unwrap_or("")
                    );
                }
            }
        }
        Err(e) => {
            eprintln!("Error seeding store: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_activity(config: &Config) {
    let records = match open_repository(config).activity_logs() {
        Ok(records) => records,
        Err(e) => {
            eprintln!("Error reading store: {e}");
            std::process::exit(1);
        }
    };

    if records.is_empty() {
        println!("No activity recorded.");
        return;
    }

    let now = now(config);
    let mut records: Vec<_> = records.into_iter().collect();
    records.sort_by_key(|(_, record)| std::cmp::Reverse(record.classification.timestamp));

    for (id, record) in records {
        let date = format_date(record.classification.timestamp, &now);
        println!(
            "{date:<20} {:<8} {:<6} {id}",
            record.classification.activity.label(),
            record.source.to_string()
        );
    }
}

fn cmd_config(mut config: Config, assignments: &[String]) {
    if !assignments.is_empty() {
        for assignment in assignments {
            let Some((key, value)) = assignment.split_once('=') else {
                eprintln!("Error: expected KEY=VALUE but got {assignment:?}");
                std::process::exit(1);
            };
            if let Err(e) = config.set(key.trim(), value.trim()) {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
        if let Err(e) = config.save() {
            eprintln!("Error saving config: {e}");
            std::process::exit(1);
        }
        println!("Saved {:?}", Config::config_path());
        println!();
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!("Store file: {:?}", config.store_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

fn open_repository(config: &Config) -> TelemetryRepository {
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }
    match FileStore::open(config.store_path()) {
        Ok(store) => TelemetryRepository::new(Arc::new(store)),
        Err(e) => {
            eprintln!("Error opening store {:?}: {e}", config.store_path());
            std::process::exit(1);
        }
    }
}

fn timezone(config: &Config) -> chrono_tz::Tz {
    match config.tz() {
        Ok(tz) => tz,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn now(config: &Config) -> DateTime<chrono_tz::Tz> {
    Utc::now().with_timezone(&timezone(config))
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error serializing: {e}");
            std::process::exit(1);
        }
    }
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reading() {
        let reading = parse_reading("1.5, -2,9.8").unwrap();
        assert_eq!(reading, AccelerationReading::new(1.5, -2.0, 9.8));

        let partial = parse_reading("1,,3").unwrap();
        assert_eq!(partial.y, None);
        assert_eq!(partial.z, Some(3.0));
    }

    #[test]
    fn test_parse_reading_rejects_bad_input() {
        assert!(parse_reading("1,2").is_err());
        assert!(parse_reading("1,2,3,4").is_err());
        assert!(parse_reading("1,two,3").is_err());
    }
}
