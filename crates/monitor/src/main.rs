//! webusb-serial monitor
//!
//! Opens a WebUSB-capable CDC-ACM board, prints what it sends and forwards
//! stdin lines to it.

mod config;

use anyhow::{Context, Result, bail};
use clap::Parser;
use common::setup_logging;
use protocol::{DeviceFilter, FilterSet};
use serial::usb::LibusbHost;
use serial::{Handler, OpenOptions, SerialPort};
use std::io::Write as _;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "webusb-serial-monitor")]
#[command(author, version, about = "Serial monitor for WebUSB CDC-ACM boards")]
#[command(long_about = "
Talks to Arduino, Adafruit and similar boards that expose a vendor-class
CDC-ACM interface, without going through the kernel tty driver.

EXAMPLES:
    # Connect to the first authorized board at 9600 baud
    webusb-serial-monitor

    # Pick a specific board and print whole lines
    webusb-serial-monitor --vid 2341 --pid 8036 --baud 115200 --line-mode

    # Show matching boards and exit
    webusb-serial-monitor --list

CONFIGURATION:
    1. Path specified with --config
    2. ~/.config/webusb-serial/monitor.toml
    3. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Line rate sent with SET_LINE_CODING
    #[arg(short, long, value_name = "BAUD")]
    baud: Option<u32>,

    /// Vendor ID to accept in addition to the filters, in hex
    #[arg(long, value_name = "VID", value_parser = parse_usb_id, requires = "pid")]
    vid: Option<u16>,

    /// Product ID to accept in addition to the filters, in hex
    #[arg(long, value_name = "PID", value_parser = parse_usb_id, requires = "vid")]
    pid: Option<u16>,

    /// Always go through the filters instead of reusing an authorized board
    #[arg(long)]
    no_auto_connect: bool,

    /// Print complete lines instead of a hex dump
    #[arg(long)]
    line_mode: bool,

    /// Bytes to accumulate before each data event
    #[arg(long, value_name = "BYTES")]
    buffer_size: Option<usize>,

    /// List boards matching the filters and exit
    #[arg(long)]
    list: bool,
}

fn parse_usb_id(s: &str) -> Result<u16, String> {
    protocol::parse_hex_u16(s).ok_or_else(|| format!("'{}' is not a 16-bit hex id", s))
}

fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = config::MonitorConfig::default();
        let path = config::MonitorConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        config::MonitorConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        config::MonitorConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.monitor.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("webusb-serial monitor v{}", env!("CARGO_PKG_VERSION"));
    debug!("Log level: {}", log_level);

    let mut filters = config.filter_set()?;
    if let (Some(vid), Some(pid)) = (args.vid, args.pid) {
        filters = filters.with_extra([DeviceFilter::device(vid, pid)]);
    }

    let host = LibusbHost::new()
        .context("Failed to initialize libusb")?
        .with_authorized(config.authorized_set()?);

    if args.list {
        return list_devices(&host, &filters);
    }

    let port = SerialPort::with_filters(host, filters);
    register_handlers(
        &port,
        args.line_mode || config.monitor.line_mode,
        args.buffer_size.unwrap_or(config.monitor.buffer_size),
    );

    let options = OpenOptions::new()
        .auto_connect(config.serial.auto_connect && !args.no_auto_connect)
        .baud_rate(args.baud.unwrap_or(config.serial.baud_rate));
    port.open(options).await;

    if !port.is_connected() {
        bail!("No board connected, run with --list to see what matches the filters");
    }

    info!(
        "Connected: interface {}, IN 0x{:02x}, OUT 0x{:02x}",
        port.interface_number(),
        port.endpoint_in(),
        port.endpoint_out()
    );

    let result = run(&port).await;

    info!("Monitor shutting down...");
    port.close().await;
    result
}

fn list_devices(host: &LibusbHost, filters: &FilterSet) -> Result<()> {
    let devices = host
        .list_devices(filters)
        .context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No matching boards found");
        return Ok(());
    }

    for device in devices {
        println!(
            "{:04x}:{:04x}  {}",
            device.vendor_id,
            device.product_id,
            device.label()
        );
    }
    Ok(())
}

fn register_handlers(port: &SerialPort<LibusbHost>, line_mode: bool, buffer_size: usize) {
    port.set_buffer_size(buffer_size);

    port.on_open(Handler::notify(|| info!("Board opened")));

    port.on_close(Handler::notify(|| info!("Connection closed")));

    port.on_error(Handler::error(|e| error!("Serial error: {}", e)));

    let reader = port.reader();
    if line_mode {
        port.on_data(Handler::notify(move || {
            // An empty line still consumes its newline
            loop {
                let before = reader.available();
                let line = reader.read_line();
                if reader.available() == before {
                    break;
                }
                println!("{}", line.trim_end_matches('\r'));
            }
        }));
    } else {
        port.on_data(Handler::notify(move || {
            if let Some(bytes) = reader.read_bytes() {
                let mut stdout = std::io::stdout().lock();
                let _ = writeln!(stdout, "{}", hex_dump(&bytes));
            }
        }));
    }
}

async fn run(port: &SerialPort<LibusbHost>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C");
                return Ok(());
            }
            line = lines.next_line() => {
                match line.context("Failed to read stdin")? {
                    Some(line) => port.write(format!("{}\n", line)),
                    None => {
                        debug!("stdin closed, waiting for Ctrl+C");
                        break;
                    }
                }
            }
        }
    }

    signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    if !port.is_connected() {
        warn!("Board went away before shutdown");
    }
    Ok(())
}
