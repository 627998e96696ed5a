use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use quadlink_core::{
    attempt_device, AttemptOutcome, Config, DeviceAddress, DeviceRegistry, DeviceScanner,
    FileStore, LinkEvent, LoopbackLink, ProtocolError, Responder, ResponderEvent, ScanEvent,
    SessionEvent, WifiConfig, WifiMode,
};
use std::io::{self, Write};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "quadlink")]
#[command(about = "Scanner and emulator for the BLE configuration protocol of legged robots")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Load configuration from a JSON file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for robots and harvest serial numbers
    Scan {
        /// Only consider names with this prefix (repeatable)
        #[arg(short, long)]
        prefix: Vec<String>,

        #[command(flatten)]
        wifi: WifiArgs,
    },
    /// Run the scanner flow against the built-in emulator
    Simulate {
        /// Serial the emulated robot reports
        #[arg(long)]
        serial: Option<String>,

        /// Registry address to record the emulated robot under
        #[arg(long, default_value = "02:00:00:00:00:01")]
        address: String,

        #[command(flatten)]
        wifi: WifiArgs,
    },
    /// Emulate a robot over a hex line pipe on stdin/stdout
    Emulate {
        /// Serial reported to GetSerial
        #[arg(long)]
        serial: Option<String>,
    },
    /// List harvested robots
    List {
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Clear the device registry
    Clear,
    /// Print the effective configuration
    Config {
        /// Write it to this path instead
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct WifiArgs {
    /// Provision this SSID after the serial is read
    #[arg(long)]
    ssid: Option<String>,

    #[arg(long, requires = "ssid")]
    password: Option<String>,

    #[arg(long, default_value = "US")]
    country: String,

    #[arg(long, value_enum, default_value_t = ModeArg::Sta)]
    mode: ModeArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Ap,
    Sta,
}

impl WifiArgs {
    fn to_config(&self) -> Option<WifiConfig> {
        let ssid = self.ssid.as_ref()?;
        let mode = match self.mode {
            ModeArg::Ap => WifiMode::AccessPoint,
            ModeArg::Sta => WifiMode::Station,
        };
        Some(
            WifiConfig::new(
                ssid.clone(),
                self.password.clone().unwrap_or_default(),
                self.country.clone(),
            )
            .with_mode(mode),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    config.validate().map_err(|e| anyhow!("Invalid configuration: {}", e))?;

    match cli.command {
        Commands::Scan { prefix, wifi } => scan(config, prefix, wifi).await,
        Commands::Simulate {
            serial,
            address,
            wifi,
        } => simulate(config, serial, address, wifi).await,
        Commands::Emulate { serial } => emulate(config, serial).await,
        Commands::List { json } => list_devices(config, json),
        Commands::Clear => clear_registry(config),
        Commands::Config { write } => show_config(config, write),
    }
}

fn open_registry(config: &Config) -> Result<DeviceRegistry<FileStore>> {
    let path = config.registry_path();
    let store = FileStore::open(&path)
        .with_context(|| format!("Failed to open registry at {}", path.display()))?;
    Ok(DeviceRegistry::new(store))
}

async fn scan(config: Config, prefixes: Vec<String>, wifi: WifiArgs) -> Result<()> {
    let mut scanner_config = config.scanner.clone();
    if !prefixes.is_empty() {
        scanner_config = scanner_config.with_prefixes(prefixes);
    }
    if let Some(wifi) = wifi.to_config() {
        scanner_config = scanner_config.with_wifi(wifi);
    }

    let registry = open_registry(&config)?;
    println!("🔗 QuadLink scanner");
    println!(
        "Registry: {} ({} known)",
        registry.store().path().display(),
        registry.count()?
    );
    println!("Press Ctrl+C to stop\n");

    let mut scanner = DeviceScanner::new(scanner_config, registry).await?;

    if let Some(mut events) = scanner.take_event_receiver() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                print_scan_event(&event);
            }
        });
    }

    scanner
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    println!("👋 Goodbye! {} robot(s) in registry", scanner.registry().count()?);
    Ok(())
}

fn print_scan_event(event: &ScanEvent) {
    match event {
        ScanEvent::ScanningStateChanged { scanning } => {
            if *scanning {
                println!("🔍 Started scanning");
            } else {
                println!("⏹️ Stopped scanning");
            }
        }
        ScanEvent::DeviceDiscovered { address, name, rssi } => match rssi {
            Some(rssi) => println!("📡 {} ({}) RSSI: {}dBm", name, address, rssi),
            None => println!("📡 {} ({})", name, address),
        },
        ScanEvent::AlreadyKnown { address } => println!("⏭️ {} already harvested", address),
        ScanEvent::SerialHarvested { record } => {
            println!("✅ {} serial: {}", record.address, record.serial);
        }
        ScanEvent::AttemptFailed { address, error } => println!("❌ {}: {}", address, error),
    }
}

async fn simulate(
    config: Config,
    serial: Option<String>,
    address: String,
    wifi: WifiArgs,
) -> Result<()> {
    let serial = serial.unwrap_or_else(|| config.emulator.serial.clone());
    let wifi = wifi.to_config().or_else(|| config.scanner.wifi.clone());
    let address = DeviceAddress::new(&address);

    let mut registry = open_registry(&config)?;
    let (event_sender, mut events) = mpsc::unbounded_channel();
    let link = LoopbackLink::with_events(serial, event_sender);

    let outcome = attempt_device(
        &mut registry,
        &address,
        move || async move { Ok::<_, ProtocolError>(link) },
        config.scanner.initiator_timeouts(),
        wifi.as_ref(),
    )
    .await;

    while let Ok(event) = events.try_recv() {
        print_responder_event(&event);
    }

    match outcome? {
        AttemptOutcome::AlreadyKnown => {
            println!("⏭️ {} already harvested; run `quadlink clear` to repeat", address);
        }
        AttemptOutcome::Harvested(record) => {
            println!("✅ {} serial: {}", record.address, record.serial);
            if let Some(wifi) = wifi.filter(|_| record.configured) {
                println!("📶 Provisioned '{}' ({})", wifi.ssid, wifi.mode);
            }
        }
    }
    Ok(())
}

async fn emulate(config: Config, serial: Option<String>) -> Result<()> {
    let serial = serial.unwrap_or_else(|| config.emulator.serial.clone());
    let (event_sender, mut events) = mpsc::unbounded_channel();
    let mut responder = Responder::new(serial.clone(), Vec::<Vec<u8>>::new()).with_events(event_sender);

    info!(
        "🤖 Emulating '{}' (serial {})",
        config.emulator.device_name, serial
    );
    eprintln!("Feed hex frames, one per line; `connect`, `disconnect` and `quit` are transport events");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "quit" => break,
            "connect" => responder.handle_event(LinkEvent::Connected),
            "disconnect" => responder.handle_event(LinkEvent::Disconnected { reason: 0 }),
            frame => match hex::decode(frame.replace(' ', "")) {
                Ok(bytes) => responder.handle_event(LinkEvent::Write(bytes)),
                Err(e) => warn!("Not a hex frame ({}): {}", e, frame),
            },
        }

        for frame in responder.notifier_mut().drain(..) {
            writeln!(stdout, "{}", hex::encode(frame))?;
        }
        stdout.flush()?;

        while let Ok(event) = events.try_recv() {
            print_responder_event(&event);
        }
    }

    Ok(())
}

fn print_responder_event(event: &ResponderEvent) {
    match event {
        ResponderEvent::Connected => eprintln!("🤝 Client connected"),
        ResponderEvent::Disconnected { reason } => eprintln!("❌ Client disconnected ({})", reason),
        ResponderEvent::PacketDropped { reason } => eprintln!("🗑️ Dropped packet: {}", reason),
        ResponderEvent::Session(SessionEvent::InjectionSuspected {
            password,
            injected_command,
        }) => {
            eprintln!("⚠️ Injection suspected in password '{}'", password);
            if let Some(command) = injected_command {
                eprintln!("   would run as root: {}", command);
            }
        }
        ResponderEvent::Session(SessionEvent::ConfigurationApplied(wifi)) => {
            eprintln!("📶 Would execute: {}", wifi.simulated_command());
        }
        ResponderEvent::Session(other) => eprintln!("   {:?}", other),
    }
}

fn list_devices(config: Config, json: bool) -> Result<()> {
    let registry = open_registry(&config)?;
    let records = registry.list_all()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No robots harvested yet");
        return Ok(());
    }

    println!("Harvested robots ({}):", records.len());
    for record in records {
        let wifi = match (&record.wifi_ssid, record.configured) {
            (Some(ssid), true) => format!(" wifi='{}'", ssid),
            _ => String::new(),
        };
        println!("  {} - {}{}", record.address, record.serial, wifi);
    }
    Ok(())
}

fn clear_registry(config: Config) -> Result<()> {
    let mut registry = open_registry(&config)?;
    let count = registry.count()?;
    registry.clear()?;
    println!("Cleared {} record(s)", count);
    Ok(())
}

fn show_config(config: Config, write: Option<PathBuf>) -> Result<()> {
    match write {
        Some(path) => {
            config.save_to_file(&path)?;
            println!("Wrote {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&config)?),
    }
    Ok(())
}
