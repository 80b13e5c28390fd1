use anyhow::{Context, Result, bail};
use bcmxcp_usb::{DeviceSelector, DriverConfig, MemoryStore, Request, SelectorConfig, ShutdownToken, UsbOpener, XcpDriver};
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::{signal, time::sleep};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const NOT_FOUND_HELP: &str = "Unable to find a USB POWERWARE device.

Things to try:
 - Connect the device to a USB bus
 - Run this program as a user with access to the USB device node

Fatal error: unusable configuration.";

/// Talk to a Powerware/Phoenixtec UPS over USB using the BCM/XCP protocol.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
    /// Also write logs to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    selector: SelectorArgs,
    #[command(subcommand)]
    command: Cmd,
}

/// Device filters, each an anchored case-insensitive regular expression.
#[derive(Args, Debug)]
struct SelectorArgs {
    #[arg(long)]
    vendorid: Option<String>,
    #[arg(long)]
    productid: Option<String>,
    #[arg(long)]
    vendor: Option<String>,
    #[arg(long)]
    product: Option<String>,
    #[arg(long)]
    serial: Option<String>,
    #[arg(long)]
    bus: Option<String>,
}

impl From<SelectorArgs> for SelectorConfig {
    fn from(args: SelectorArgs) -> Self {
        SelectorConfig {
            vendor_id: args.vendorid,
            product_id: args.productid,
            vendor: args.vendor,
            product: args.product,
            serial: args.serial,
            bus: args.bus,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Send a single-opcode request and print the reply.
    Read {
        /// Request name (e.g. `status`, `id-block`) or hex opcode.
        #[arg(value_parser = parse_opcode)]
        request: u8,
    },
    /// Send an opcode with parameters and print the reply.
    Write {
        #[arg(value_parser = parse_opcode)]
        opcode: u8,
        /// Parameters as a hex string.
        payload: String,
    },
    /// Repeat a request until Ctrl+C or the count is reached.
    Poll {
        #[arg(value_parser = parse_opcode)]
        request: u8,
        #[arg(short, long, default_value_t = 2000)]
        interval_ms: u64,
        #[arg(short, long)]
        count: Option<u32>,
    },
}

fn parse_opcode(s: &str) -> Result<u8, String> {
    if let Ok(request) = Request::from_str(s) {
        return Ok(request.into());
    }
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(digits, 16).map_err(|_| format!("`{s}` is neither a request name nor a hex opcode"))
}

fn init_tracing(cli: &Cli) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::builder()
        .with_default_directive(cli.verbose.tracing_level_filter().into())
        .from_env_lossy();
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false));

    match &cli.log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().context("Log file path has no file name")?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            registry.with(fmt::layer().with_ansi(false).with_writer(writer)).init();
            Ok(Some(guard))
        }
        None => {
            registry.init();
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(&cli)?;

    let shutdown = ShutdownToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down gracefully.");
            on_signal.trigger();
        }
    });

    let config = DriverConfig::default().with_selector(cli.selector.into());
    let selector = DeviceSelector::new(&config.selector).context("Invalid device selector")?;
    let mut driver = XcpDriver::initialize(UsbOpener::new(selector), &config, MemoryStore::new(), shutdown.clone())
        .await
        .context(NOT_FOUND_HELP)?;

    if let Some(identity) = driver.identity() {
        println!("Connected to {identity}");
    }
    let store = driver.store();
    println!(
        "ups.vendorid = {}, ups.productid = {}",
        store.get("ups.vendorid").unwrap_or("?"),
        store.get("ups.productid").unwrap_or("?")
    );

    let outcome = run(&mut driver, cli.command, &shutdown).await;
    shutdown.trigger();
    driver.shutdown();
    outcome
}

async fn run(driver: &mut XcpDriver<UsbOpener, MemoryStore>, command: Cmd, shutdown: &ShutdownToken) -> Result<()> {
    match command {
        Cmd::Read { request } => {
            let reply = driver.read_command(request).await?;
            println!("{:#04x} -> {} bytes: {}", request, reply.len(), hex::encode(&reply));
        }
        Cmd::Write { opcode, payload } => {
            let payload = hex::decode(payload.trim()).context("Payload is not valid hex")?;
            let reply = driver.write_command(opcode, &payload).await?;
            println!("{:#04x} -> {} bytes: {}", opcode, reply.len(), hex::encode(&reply));
        }
        Cmd::Poll {
            request,
            interval_ms,
            count,
        } => {
            if interval_ms == 0 {
                bail!("Polling interval must be at least 1 ms");
            }
            let mut polled = 0u32;
            while !shutdown.is_triggered() && count.is_none_or(|c| polled < c) {
                polled += 1;
                match driver.read_command(request).await {
                    Ok(reply) => println!("[{}] {}", polled, hex::encode(&reply)),
                    Err(e) => warn!("[{}] data stale: {}", polled, e),
                }
                sleep(Duration::from_millis(interval_ms)).await;
            }
            info!("Finished polling after {} requests.", polled);
        }
    }
    Ok(())
}
