//! Binary entry point for the Leasehold CLI.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use leasehold::{
    HttpChannel, IpamConfig, OptionStore, SystemResolver, VmInventory, VmRecord, WorkflowOutcome,
    run_acquire, run_check_dns, run_provision, run_register, run_unregister,
};

#[derive(Debug, Parser)]
#[command(
    name = "leasehold",
    about = "Drive a BlueCat-style IPAM through the VM provisioning lifecycle",
    arg_required_else_help = true
)]
struct Cli {
    /// Increase log verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Reserve or rebind an address for the machine in the state file")]
    Provision(ProvisionCommand),
    #[command(about = "Reserve a name and address under a placeholder MAC (phase 1)")]
    Acquire(ProvisionCommand),
    #[command(about = "Rebind the reservation to the real MAC and deploy (phase 2)")]
    Register(ProvisionCommand),
    #[command(about = "Release the IPAM records of a retired machine")]
    Unregister(UnregisterCommand),
    #[command(name = "check-dns", about = "Verify the reserved name resolves correctly")]
    CheckDns(CheckDnsCommand),
}

#[derive(Debug, Parser)]
struct ProvisionCommand {
    /// JSON file holding the workflow option bag.
    #[arg(long)]
    state: PathBuf,
    /// JSON file holding the VM inventory.
    #[arg(long)]
    inventory: PathBuf,
}

#[derive(Debug, Parser)]
struct UnregisterCommand {
    /// JSON file holding the VM inventory.
    #[arg(long)]
    inventory: PathBuf,
    /// Inventory name of the machine to retire.
    #[arg(long)]
    vm: String,
}

#[derive(Debug, Parser)]
struct CheckDnsCommand {
    /// JSON file holding the workflow option bag.
    #[arg(long)]
    state: PathBuf,
    /// Retry interval reported on an empty DNS answer, in seconds.
    #[arg(long, default_value_t = 60)]
    retry_interval_secs: u64,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("state file error: {0}")]
    State(String),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let exit_code = match dispatch(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            write_error(io::stderr(), &err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: u8) {
    let default_directive = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Provisioning phase selected by the subcommand.
#[derive(Clone, Copy, Debug)]
enum ProvisionPhase {
    Auto,
    Acquire,
    Register,
}

async fn dispatch(command: Command) -> Result<i32, CliError> {
    match command {
        Command::Provision(args) => provision(args, ProvisionPhase::Auto).await,
        Command::Acquire(args) => provision(args, ProvisionPhase::Acquire).await,
        Command::Register(args) => provision(args, ProvisionPhase::Register).await,
        Command::Unregister(args) => unregister(args).await,
        Command::CheckDns(args) => check_dns(args).await,
    }
}

async fn provision(args: ProvisionCommand, phase: ProvisionPhase) -> Result<i32, CliError> {
    let config = load_config()?;
    let channel = HttpChannel::new(&config).map_err(|err| CliError::Transport(err.to_string()))?;
    let mut options = FileOptions::load(&args.state)?;
    let mut inventory = FileInventory::load(&args.inventory)?;

    let outcome = match phase {
        ProvisionPhase::Auto => {
            run_provision(channel, config, &mut options, &mut inventory).await
        }
        ProvisionPhase::Acquire => {
            run_acquire(channel, config, &mut options, &mut inventory).await
        }
        ProvisionPhase::Register => {
            run_register(channel, config, &mut options, &mut inventory).await
        }
    };
    options.save()?;
    inventory.save()?;
    Ok(exit_code_for(&outcome))
}

async fn unregister(args: UnregisterCommand) -> Result<i32, CliError> {
    let config = load_config()?;
    let channel = HttpChannel::new(&config).map_err(|err| CliError::Transport(err.to_string()))?;
    let inventory = FileInventory::load(&args.inventory)?;

    let outcome = run_unregister(channel, config, &inventory, &args.vm).await;
    Ok(exit_code_for(&outcome))
}

async fn check_dns(args: CheckDnsCommand) -> Result<i32, CliError> {
    let options = FileOptions::load(&args.state)?;
    let interval = Duration::from_secs(args.retry_interval_secs);
    let outcome = run_check_dns(&SystemResolver, &options, interval).await;
    Ok(exit_code_for(&outcome))
}

fn load_config() -> Result<IpamConfig, CliError> {
    let config =
        IpamConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    Ok(config)
}

fn exit_code_for(outcome: &WorkflowOutcome) -> i32 {
    match outcome {
        WorkflowOutcome::Completed => 0,
        WorkflowOutcome::Aborted { reason } => {
            writeln!(io::stderr(), "aborted: {reason}").ok();
            1
        }
        WorkflowOutcome::Retry { reason, interval } => {
            writeln!(
                io::stderr(),
                "retry in {}s: {reason}",
                interval.as_secs()
            )
            .ok();
            2
        }
    }
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

/// Workflow option bag persisted as a flat JSON object.
#[derive(Debug)]
struct FileOptions {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FileOptions {
    fn load(path: &Path) -> Result<Self, CliError> {
        let text = fs::read_to_string(path).map_err(|err| {
            CliError::State(format!("cannot read {}: {err}", path.display()))
        })?;
        let values = serde_json::from_str(&text).map_err(|err| {
            CliError::State(format!("cannot parse {}: {err}", path.display()))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            values,
        })
    }

    fn save(&self) -> Result<(), CliError> {
        let text = serde_json::to_string_pretty(&self.values)
            .map_err(|err| CliError::State(err.to_string()))?;
        fs::write(&self.path, text).map_err(|err| {
            CliError::State(format!("cannot write {}: {err}", self.path.display()))
        })
    }
}

impl OptionStore for FileOptions {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_owned(), value.to_owned());
    }
}

/// One machine entry in the inventory file.
#[derive(Debug, Default, Deserialize, Serialize)]
struct InventoryEntry {
    name: String,
    #[serde(default)]
    mac_addresses: Vec<String>,
    #[serde(default)]
    ip_addresses: Vec<String>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

/// VM inventory persisted as a JSON array of entries.
#[derive(Debug)]
struct FileInventory {
    path: PathBuf,
    entries: Vec<InventoryEntry>,
}

impl FileInventory {
    fn load(path: &Path) -> Result<Self, CliError> {
        let text = fs::read_to_string(path).map_err(|err| {
            CliError::State(format!("cannot read {}: {err}", path.display()))
        })?;
        let entries = serde_json::from_str(&text).map_err(|err| {
            CliError::State(format!("cannot parse {}: {err}", path.display()))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    fn save(&self) -> Result<(), CliError> {
        let text = serde_json::to_string_pretty(&self.entries)
            .map_err(|err| CliError::State(err.to_string()))?;
        fs::write(&self.path, text).map_err(|err| {
            CliError::State(format!("cannot write {}: {err}", self.path.display()))
        })
    }
}

impl VmInventory for FileInventory {
    fn names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.name.clone()).collect()
    }

    fn find(&self, name: &str) -> Option<VmRecord> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| VmRecord {
                name: entry.name.clone(),
                mac_addresses: entry.mac_addresses.clone(),
                ip_addresses: entry.ip_addresses.clone(),
            })
    }

    fn custom_get(&self, vm: &str, key: &str) -> Option<String> {
        self.entries
            .iter()
            .find(|entry| entry.name == vm)
            .and_then(|entry| entry.attributes.get(key).cloned())
    }

    fn custom_set(&mut self, vm: &str, key: &str, value: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.name == vm) {
            entry.attributes.insert(key.to_owned(), value.to_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        fs::write(file.path(), contents).expect("seed temp file");
        file
    }

    #[test]
    fn file_options_round_trip() {
        let file = write_temp(r#"{"vm_config_network": "10.0.0.0/24 lab.example"}"#);
        let mut options = FileOptions::load(file.path()).expect("load");
        assert_eq!(
            options.get("vm_config_network").as_deref(),
            Some("10.0.0.0/24 lab.example")
        );

        options.set("vmipaddr", "10.0.0.5");
        options.save().expect("save");

        let reloaded = FileOptions::load(file.path()).expect("reload");
        assert_eq!(reloaded.get("vmipaddr").as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn file_inventory_reads_records_and_attributes() {
        let file = write_temp(
            r#"[{"name": "cf000001", "mac_addresses": ["AA-BB-CC-DD-EE-FF"], "ip_addresses": ["10.0.0.5"]}]"#,
        );
        let mut inventory = FileInventory::load(file.path()).expect("load");

        assert_eq!(inventory.names(), vec![String::from("cf000001")]);
        let record = inventory.find("cf000001").expect("record");
        assert_eq!(record.mac_addresses, vec![String::from("AA-BB-CC-DD-EE-FF")]);

        inventory.custom_set("cf000001", "bluecat_ipaddress", "10.0.0.5");
        inventory.save().expect("save");
        let reloaded = FileInventory::load(file.path()).expect("reload");
        assert_eq!(
            reloaded.custom_get("cf000001", "bluecat_ipaddress").as_deref(),
            Some("10.0.0.5")
        );
    }

    #[test]
    fn outcomes_map_to_distinct_exit_codes() {
        assert_eq!(exit_code_for(&WorkflowOutcome::Completed), 0);
        assert_eq!(
            exit_code_for(&WorkflowOutcome::Aborted {
                reason: String::from("no address"),
            }),
            1
        );
        assert_eq!(
            exit_code_for(&WorkflowOutcome::Retry {
                reason: String::from("login failed"),
                interval: Duration::from_secs(60),
            }),
            2
        );
    }
}
