use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use imu_core::session::{ImuSession, SessionConfig, kind_from_log_name, open_log};
use imu_core::{CancelToken, DecodedSample, FieldValue, LockRegion, PacketKind};
use tracing::{error, info, warn};

const DEFAULT_CONFIG: &str = "imuctl.toml";

#[derive(Parser, Debug)]
#[command(author, version, about = "IMU serial protocol tool", long_about = None)]
struct Args {
    /// Session configuration (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial port, overrides the configuration
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate, overrides the configuration
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record raw frames to a binary file until Ctrl-C
    Log {
        /// Packet type (S1, S2, A1, A2, FM, S3, AT)
        #[arg(short = 't', long = "type")]
        packet_type: Option<PacketKind>,
        /// Device output rate in Hz
        #[arg(long)]
        odr: Option<u32>,
    },
    /// Print decoded samples at display rate until Ctrl-C
    Watch {
        #[arg(short = 't', long = "type")]
        packet_type: Option<PacketKind>,
        #[arg(long)]
        odr: Option<u32>,
    },
    /// Decode a binary log as tab-separated text
    Parse {
        file: PathBuf,
        /// Packet type; defaults to the tag in a `<device>_<type>_<time>.bin` name
        #[arg(short = 't', long = "type")]
        packet_type: Option<PacketKind>,
    },
    /// Show serial number and model
    Info,
    /// Read or write configuration fields
    Fields {
        #[command(subcommand)]
        action: FieldsAction,
    },
    /// Lock a memory region
    Lock { region: LockRegion },
    /// Unlock a memory region
    Unlock { region: LockRegion },
    /// Software reset
    Restart,
    /// Flash a new application image
    Upgrade { image: PathBuf },
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum FieldsAction {
    /// Current values (GF)
    Get {
        #[arg(required = true, value_parser = parse_field_id)]
        ids: Vec<u16>,
    },
    /// Stored values (RF)
    Read {
        #[arg(required = true, value_parser = parse_field_id)]
        ids: Vec<u16>,
    },
    /// Set values until power cycle (SF), as id=value
    Set {
        #[arg(required = true, value_parser = parse_assignment)]
        fields: Vec<(u16, FieldValue)>,
    },
    /// Store values permanently (WF), as id=value
    Write {
        #[arg(required = true, value_parser = parse_assignment)]
        fields: Vec<(u16, FieldValue)>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write a default configuration file
    Init,
    /// Print the effective configuration
    Show,
}

fn parse_u16(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}

fn parse_field_id(s: &str) -> Result<u16, String> {
    parse_u16(s)
}

/// `id=value`; non-numeric values are sent as their ASCII bytes.
fn parse_assignment(s: &str) -> Result<(u16, FieldValue), String> {
    let (id, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected id=value, got '{s}'"))?;
    let id = parse_u16(id.trim())?;
    let value = value.trim();
    let value = match parse_u16(value) {
        Ok(word) => FieldValue::Word(word),
        Err(_) => FieldValue::Raw(value.as_bytes().to_vec()),
    };
    Ok((id, value))
}

fn load_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).exists() => SessionConfig::load_from_file(DEFAULT_CONFIG)?,
        None => SessionConfig::default(),
    };
    if let Some(port) = &args.port {
        config.port = port.clone();
    }
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }
    Ok(config)
}

fn apply_stream_overrides(config: &mut SessionConfig, packet_type: Option<PacketKind>, odr: Option<u32>) {
    if let Some(kind) = packet_type {
        config.packet_type = kind;
    }
    if let Some(odr) = odr {
        config.output_rate = odr;
    }
}

fn require_port(config: &SessionConfig) -> Result<()> {
    if config.port.is_empty() {
        return Err(anyhow!("No serial port configured (use --port or set `port` in {DEFAULT_CONFIG})"));
    }
    Ok(())
}

/// Token fired by Ctrl-C.
fn interrupt_token() -> Result<CancelToken> {
    let cancel = CancelToken::new();
    let handler = cancel.clone();
    ctrlc::set_handler(move || handler.cancel()).context("Failed to install Ctrl-C handler")?;
    Ok(cancel)
}

fn format_sample(sample: &DecodedSample) -> String {
    let view = sample.channels();
    let mut parts = Vec::new();
    for (i, a) in view.accels.iter().enumerate() {
        parts.push(format!("acc{i} {:9.4} {:9.4} {:9.4}", a[0], a[1], a[2]));
    }
    for (i, g) in view.gyros.iter().enumerate() {
        parts.push(format!("gyro{i} {:9.3} {:9.3} {:9.3}", g[0], g[1], g[2]));
    }
    for (i, t) in view.temps.iter().enumerate() {
        parts.push(format!("temp{i} {t:7.2}"));
    }
    for (i, a) in view.angles.iter().enumerate() {
        parts.push(format!("ang{i} {:8.3} {:8.3}", a[0], a[1]));
    }
    parts.join(" | ")
}

fn run(args: Args) -> Result<()> {
    let mut config = load_config(&args)?;

    match args.command {
        Command::Config { action } => match action {
            ConfigAction::Init => {
                let path = args.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
                config.save_to_file(&path)?;
                info!(path = %path.display(), "Configuration written");
            }
            ConfigAction::Show => {
                print!("{}", config.to_toml()?);
            }
        },
        Command::Parse { file, packet_type } => {
            let kind = packet_type
                .or_else(|| kind_from_log_name(&file))
                .unwrap_or(config.packet_type);
            info!(%kind, file = %file.display(), "Parsing log");
            let replay = open_log(&file, kind)?;
            let mut header_printed = false;
            let mut count = 0u64;
            for item in replay {
                let item = item?;
                if !header_printed {
                    let names: Vec<&str> = item.sample.fields.iter().map(|f| f.name).collect();
                    println!("{}", names.join("\t"));
                    header_printed = true;
                }
                let values: Vec<String> = item.sample.values().iter().map(|v| v.to_string()).collect();
                println!("{}", values.join("\t"));
                count += 1;
            }
            info!(samples = count, file = %file.display(), "Parse complete");
        }
        Command::Log { packet_type, odr } => {
            apply_stream_overrides(&mut config, packet_type, odr);
            require_port(&config)?;
            let cancel = interrupt_token()?;
            info!("Logging, press Ctrl-C to stop");
            let (path, summary) = ImuSession::new(config).log_to_file(cancel)?;
            info!(
                path = %path.display(),
                frames = summary.frames,
                bytes = summary.bytes,
                "Log saved"
            );
            if summary.evicted > 0 {
                warn!(evicted = summary.evicted, "Frames were dropped while logging");
            }
        }
        Command::Watch { packet_type, odr } => {
            apply_stream_overrides(&mut config, packet_type, odr);
            require_port(&config)?;
            let cancel = interrupt_token()?;
            let session = ImuSession::new(config);
            for sample in session.samples(cancel)? {
                println!("{}", format_sample(&sample?));
            }
        }
        Command::Info => {
            require_port(&config)?;
            let session = ImuSession::new(config);
            let mut client = session.command_client()?;
            client.set_quiet()?;
            let product = client.get_product_info()?;
            println!("{product}");
            if product.is_bootloader() {
                warn!("Device is running its bootloader");
            }
        }
        Command::Fields { action } => {
            require_port(&config)?;
            let session = ImuSession::new(config);
            let mut client = session.command_client()?;
            client.set_quiet()?;
            match action {
                FieldsAction::Get { ids } => print_fields(&client.get_field_values(&ids)?),
                FieldsAction::Read { ids } => print_fields(&client.read_field_values(&ids)?),
                FieldsAction::Set { fields } => client.write_fields_temporary(&fields)?,
                FieldsAction::Write { fields } => client.write_fields_permanent(&fields)?,
            }
        }
        Command::Lock { region } => {
            require_port(&config)?;
            ImuSession::new(config).command_client()?.lock(region)?;
        }
        Command::Unlock { region } => {
            require_port(&config)?;
            ImuSession::new(config).command_client()?.unlock(region)?;
        }
        Command::Restart => {
            require_port(&config)?;
            let session = ImuSession::new(config);
            let mut client = session.command_client()?;
            client.set_quiet()?;
            client.restart()?;
        }
        Command::Upgrade { image } => {
            require_port(&config)?;
            let session = ImuSession::new(config);
            for progress in session.upgrade(&image)? {
                let progress = progress.context("Upgrade failed")?;
                eprint!("\rUpgrading: {progress:5.1}%");
            }
            eprintln!();
            info!("Upgrade complete");
        }
    }
    Ok(())
}

fn print_fields(values: &std::collections::BTreeMap<u16, String>) {
    for (id, value) in values {
        println!("0x{id:04X}\t0x{value}");
    }
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
