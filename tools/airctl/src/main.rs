//! airctl - command-line diagnostics for RF nodes behind a Modbus-RTU bridge
//!
//! One command per invocation; connection settings come from the airlink
//! configuration file and `AIRLINK_*` environment variables.

mod logging;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use airlink::binding::{BindingRole, BindingState};
use airlink::transport::RtuTransport;
use airlink::{
    AirlinkConfig, BridgeController, DeviceProfile, ModbusSession, Node, ProfileRegistry, Reading,
    Value,
};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "airctl")]
#[command(about = "Inspect and manage RF nodes behind a BRDG-02R13 bridge")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, global = true, env = "AIRLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Extra device profiles (YAML)
    #[arg(long, global = true)]
    profiles: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List known device profiles
    Profiles,

    /// List the nodes bound to the bridge
    Nodes,

    /// Read one field of a node
    Get {
        slave: u8,
        field: String,
    },

    /// Write one field of a node
    Set {
        slave: u8,
        field: String,
        value: String,
    },

    /// Read every readable field of a node
    Dump { slave: u8 },

    /// Show or change the bridge's OEM code
    Oem {
        /// New code, decimal or 0x-prefixed hex
        code: Option<String>,
    },

    /// Bind a new device
    Bind {
        /// Product name (e.g. VMD-02RPS78) or product code
        #[arg(long)]
        product: String,

        /// Slave address for the new node (default: lowest free)
        #[arg(long)]
        address: Option<u8>,

        /// Serial number of the device to bind
        #[arg(long)]
        serial: Option<String>,

        /// Bind as accessory of the controller at this slave address
        #[arg(long)]
        controller: Option<u8>,

        /// Seconds to wait for the device
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Remove a node from the bridge
    Unbind { slave: u8 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = AirlinkConfig::load(cli.config.as_deref()).context("loading configuration")?;
    logging::init(&config.logging, cli.verbose, !cli.no_color)?;

    let registry = Arc::new(ProfileRegistry::with_builtin());
    if let Some(path) = &cli.profiles {
        let count = registry
            .load_yaml_file(path)
            .with_context(|| format!("loading profiles from {}", path.display()))?;
        debug!("Loaded {} profiles from {}", count, path.display());
    }

    if let Commands::Profiles = cli.command {
        return list_profiles(&registry, cli.json);
    }

    let bridge = connect(&config, registry)?;
    match cli.command {
        Commands::Profiles => Ok(()),
        Commands::Nodes => list_nodes(&bridge, cli.json).await,
        Commands::Get { slave, field } => {
            let node = bridge.node(slave).await?;
            let reading = node.get_reading(&field).await?;
            print_reading(&field, &reading, cli.json)
        },
        Commands::Set {
            slave,
            field,
            value,
        } => {
            let node = bridge.node(slave).await?;
            node.set_str(&field, &value).await?;
            info!("{}: {} = {}", node, field, value);
            Ok(())
        },
        Commands::Dump { slave } => dump(&*bridge.node(slave).await?, cli.json).await,
        Commands::Oem { code } => oem(&bridge, code.as_deref(), cli.json).await,
        Commands::Bind {
            product,
            address,
            serial,
            controller,
            timeout,
        } => {
            let product = resolve_product(bridge.registry(), &product)?;
            let role = match controller {
                Some(controller) => {
                    if serial.is_some() {
                        bail!("--serial only applies when binding a controller");
                    }
                    BindingRole::Accessory {
                        controller,
                        product,
                    }
                },
                None => BindingRole::Controller {
                    product,
                    serial: serial.as_deref().map(parse_number).transpose()?,
                },
            };
            let timeout = timeout
                .map(Duration::from_secs)
                .unwrap_or(config.binding.default_timeout);
            bind(&bridge, role, address, timeout, cli.json).await
        },
        Commands::Unbind { slave } => {
            bridge.unbind(slave).await?;
            println!("Removed slave {slave}");
            Ok(())
        },
    }
}

fn connect(config: &AirlinkConfig, registry: Arc<ProfileRegistry>) -> Result<BridgeController> {
    let mut transport = RtuTransport::new(config.serial.clone())?;
    transport
        .connect()
        .with_context(|| format!("opening {}", config.serial.port))?;
    let session = Arc::new(ModbusSession::new(transport, config.session.clone()));
    Ok(BridgeController::new(session, registry, config)?)
}

fn parse_number(text: &str) -> Result<u32> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.with_context(|| format!("'{text}' is not a number"))
}

fn resolve_product(registry: &ProfileRegistry, product: &str) -> Result<u32> {
    if let Some(profile) = registry.lookup_by_name(product) {
        return Ok(profile.product_code);
    }
    let code = parse_number(product).map_err(|_| anyhow!("unknown product '{product}'"))?;
    registry.lookup(code)?;
    Ok(code)
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn capability_list(profile: &DeviceProfile) -> String {
    profile
        .capabilities
        .iter()
        .map(|c| format!("{c:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn list_profiles(registry: &ProfileRegistry, json: bool) -> Result<()> {
    let profiles = registry.profiles();
    if json {
        let profiles: Vec<&DeviceProfile> = profiles.iter().map(|p| p.as_ref()).collect();
        return print_json(&profiles);
    }

    println!("{}", "Device profiles".bold());
    for profile in profiles {
        println!(
            "  {:<14} 0x{:08X}  rev {:<3} {:>3} fields  [{}]",
            profile.name.cyan(),
            profile.product_code,
            profile.revision,
            profile.fields.len(),
            capability_list(&profile)
        );
    }
    Ok(())
}

async fn list_nodes(bridge: &BridgeController, json: bool) -> Result<()> {
    #[derive(Serialize)]
    struct Row {
        address: u8,
        product_id: u32,
        product: Option<String>,
        rf_address: u32,
    }

    let rows: Vec<Row> = bridge
        .bound_nodes()
        .await?
        .into_iter()
        .map(|n| Row {
            address: n.address,
            product_id: n.product_id,
            product: bridge
                .registry()
                .lookup(n.product_id)
                .ok()
                .map(|p| p.name.clone()),
            rf_address: n.rf_address,
        })
        .collect();

    if json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("No nodes bound to bridge {}", bridge.address());
        return Ok(());
    }
    println!("{}", format!("Nodes on bridge {}", bridge.address()).bold());
    for row in rows {
        println!(
            "  {:>3}  {:<14} 0x{:08X}  rf 0x{:08X}",
            row.address,
            row.product.as_deref().unwrap_or("unknown").cyan(),
            row.product_id,
            row.rf_address
        );
    }
    Ok(())
}

fn print_reading(field: &str, reading: &Reading, json: bool) -> Result<()> {
    if json {
        return print_json(reading);
    }
    match &reading.status {
        Some(status) => println!(
            "{} = {}  ({:?}, age {:?}{})",
            field,
            reading.value.to_string().green(),
            status.source,
            status.age,
            if status.has_error() { ", error" } else { "" }
        ),
        None => println!("{} = {}", field, reading.value.to_string().green()),
    }
    Ok(())
}

async fn dump(node: &Node, json: bool) -> Result<()> {
    node.refresh(None).await?;

    let values: Vec<(String, Value)> = node
        .profile()
        .fields
        .iter()
        .filter(|f| f.access.is_readable())
        .filter_map(|f| node.cached(&f.name).map(|c| (f.name.clone(), c.value)))
        .collect();

    if json {
        let map = values
            .into_iter()
            .map(|(name, value)| Ok((name, serde_json::to_value(value)?)))
            .collect::<Result<serde_json::Map<_, _>>>()?;
        return print_json(&map);
    }

    println!("{}", node.to_string().bold());
    for (name, value) in values {
        println!("  {:<36} {}", name, value);
    }
    Ok(())
}

async fn oem(bridge: &BridgeController, code: Option<&str>, json: bool) -> Result<()> {
    if let Some(code) = code {
        let code = u8::try_from(parse_number(code)?).context("OEM code must fit in one byte")?;
        bridge.set_oem_code(code).await?;
    }
    let current = bridge.oem_code().await?;
    if json {
        return print_json(&serde_json::json!({ "oem_code": current }));
    }
    println!("OEM code 0x{current:02X}");
    Ok(())
}

async fn bind(
    bridge: &BridgeController,
    role: BindingRole,
    address: Option<u8>,
    timeout: Duration,
    json: bool,
) -> Result<()> {
    let mut session = bridge.bind_new(role, address, timeout).await?;
    if !json {
        println!(
            "Binding slave {} for {}s, activate binding on the device now (Ctrl-C to abort)",
            session.target(),
            timeout.as_secs()
        );
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let state = session.run(cancel).await?;
    if json {
        return print_json(&state);
    }
    match state {
        BindingState::Bound(address) => {
            let name = session
                .node()
                .map(|n| n.profile().name.clone())
                .unwrap_or_default();
            println!("{} {} as slave {}", "Bound".green(), name, address);
            Ok(())
        },
        BindingState::Idle => {
            println!("Binding aborted");
            Ok(())
        },
        other => bail!("Binding {other}"),
    }
}
