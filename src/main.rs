// src/main.rs
//
// Process shell for the mGRUE host driver: argument parsing, settings,
// logging, device discovery, then hands off to the ingestion engine or the
// file sender on a blocking worker.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use mgrue_driver::io::serial::{
    list_serial_ports, wait_for_device, DiscoveryPolicy, Parity, SerialChannel, SerialConfig,
};
use mgrue_driver::sender::{validate_send_file, FileSender};
use mgrue_driver::settings::{default_settings_path, prepare_destination, SerialSettings};
use mgrue_driver::{
    logging, tlog, DestinationHandle, DriverError, DriverSettings, Engine, StatusEvent,
    WatchStatusSink,
};

#[derive(Parser, Debug)]
#[command(
    name = "mgrue-driver",
    version,
    about = "Initialize the mGRUE Host Device Driver"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Destination for the records received from the device. Default ./output
    #[arg(short = 'l', long, global = true)]
    location: Option<PathBuf>,

    /// Number of records per output file. Default 4000
    #[arg(short = 'r', long, global = true)]
    records: Option<u32>,

    /// Serial port to use instead of auto-discovery
    #[arg(long, global = true)]
    port: Option<String>,

    #[arg(long, global = true)]
    baud: Option<u32>,

    /// none, odd or even
    #[arg(long, global = true)]
    parity: Option<Parity>,

    /// Settings file (TOML). Defaults to <config dir>/mgrue/driver.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Mirror log output into a timestamped file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Print status updates as JSON lines
    #[arg(long, global = true)]
    json_status: bool,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Receive records from the device (default)
    Receive,
    /// Send a stored .fn record file to the device
    Send {
        #[arg(short = 'f', long)]
        file: PathBuf,
    },
    /// List available serial ports
    Ports,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = run(cli).await;
    logging::stop_file_logging();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tlog!("ERROR: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), DriverError> {
    if let Some(dir) = &cli.log_dir {
        logging::init_file_logging(dir)?;
    }

    let settings = load_settings(&cli)?;
    let command = cli.command.clone().unwrap_or(Command::Receive);

    if let Command::Ports = command {
        return print_ports();
    }

    let stop = Arc::new(AtomicBool::new(false));
    spawn_ctrl_c_handler(stop.clone());

    let (sink, rx) = WatchStatusSink::channel();
    let printer = tokio::spawn(print_status(rx, cli.json_status));

    let worker = match command {
        Command::Send { file } => {
            let file = validate_send_file(&file)?;
            tokio::task::spawn_blocking(move || send_blocking(settings, file, sink, &stop))
        }
        _ => {
            let destination = prepare_destination(&settings.destination)?;
            tokio::task::spawn_blocking(move || receive_blocking(settings, destination, sink, &stop))
        }
    };

    let result = match worker.await {
        Ok(result) => result,
        Err(e) => Err(DriverError::Task(format!("worker panicked: {}", e))),
    };
    printer.abort();
    result
}

fn load_settings(cli: &Cli) -> Result<DriverSettings, DriverError> {
    let mut settings = match &cli.config {
        Some(path) if !path.exists() => {
            return Err(DriverError::InvalidConfig(format!(
                "settings file {} does not exist",
                path.display()
            )))
        }
        Some(path) => DriverSettings::load(path)?,
        None => match default_settings_path() {
            Some(path) => DriverSettings::load(&path)?,
            None => DriverSettings::default(),
        },
    };

    if let Some(location) = &cli.location {
        settings.destination = location.clone();
    }
    if let Some(records) = cli.records {
        settings.records_per_file = records;
    }
    if let Some(port) = &cli.port {
        settings.serial.port = Some(port.clone());
    }
    if let Some(baud) = cli.baud {
        settings.serial.baud_rate = baud;
    }
    if let Some(parity) = cli.parity {
        settings.serial.parity = parity;
    }

    Ok(settings)
}

fn print_ports() -> Result<(), DriverError> {
    let ports = list_serial_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        match port.usb_id {
            Some((vid, pid)) => println!(
                "{}\t{}\t{:04x}:{:04x}\t{}",
                port.port_name,
                port.port_type,
                vid,
                pid,
                port.product.as_deref().unwrap_or("")
            ),
            None => println!("{}\t{}", port.port_name, port.port_type),
        }
    }
    Ok(())
}

fn spawn_ctrl_c_handler(stop: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tlog!("[driver] Interrupt received, stopping after the current read");
            stop.store(true, Ordering::Relaxed);
        }
    });
}

/// Render status updates for the user. Latest value wins: updates that
/// arrive faster than they are printed are coalesced.
async fn print_status(mut rx: watch::Receiver<StatusEvent>, json: bool) {
    loop {
        {
            let event = rx.borrow_and_update();
            if json {
                match serde_json::to_string(&*event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tlog!("[driver] Failed to serialize status: {}", e),
                }
            } else {
                println!("{}", event.message);
            }
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}

/// Explicit port from settings, otherwise poll until a device shows up.
fn resolve_port(serial: &SerialSettings, stop: &AtomicBool) -> Option<String> {
    if let Some(port) = &serial.port {
        return Some(port.clone());
    }
    wait_for_device(&DiscoveryPolicy::default(), stop, list_serial_ports).map(|p| p.port_name)
}

fn open_channel(
    settings: &DriverSettings,
    stop: &AtomicBool,
) -> Result<Option<SerialChannel>, DriverError> {
    let Some(port) = resolve_port(&settings.serial, stop) else {
        return Ok(None);
    };
    let config = SerialConfig::from_settings(port, &settings.serial);
    let timeout = std::time::Duration::from_millis(settings.read_timeout_ms);
    SerialChannel::open(&config, timeout).map(Some)
}

fn receive_blocking(
    settings: DriverSettings,
    destination: PathBuf,
    sink: WatchStatusSink,
    stop: &AtomicBool,
) -> Result<(), DriverError> {
    let config = settings.engine_config()?;
    let Some(channel) = open_channel(&settings, stop)? else {
        return Ok(());
    };

    tlog!("[driver] File Destination Path -> {}", destination.display());
    tlog!(
        "[driver] Records per file: {} ({} lines)",
        config.records_per_file,
        u64::from(config.records_per_file.get()) * mgrue_driver::ingest::LINES_PER_RECORD
    );

    let mut engine = Engine::new(
        channel,
        config,
        DestinationHandle::new(Some(destination)),
        sink,
    );
    engine.run(stop)
}

fn send_blocking(
    settings: DriverSettings,
    file: PathBuf,
    sink: WatchStatusSink,
    stop: &AtomicBool,
) -> Result<(), DriverError> {
    let Some(channel) = open_channel(&settings, stop)? else {
        return Ok(());
    };
    let timeout = std::time::Duration::from_millis(settings.read_timeout_ms);
    let mut sender = FileSender::new(channel, timeout, sink);
    if sender.run(&file, stop)?.is_none() {
        tlog!("[driver] Stopped before the device connected");
    }
    Ok(())
}
