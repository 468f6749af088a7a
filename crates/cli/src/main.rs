use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use berth_engine::{LoadedInventory, configure_group, default_inventory_path, load_inventory, plan_target, preview_targets, provision_all};
use berth_types::{HostReport, PhaseStatus, TargetReport};
use berth_util::KeySet;
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let matches = build_cli().get_matches();
    let inventory_path = matches
        .get_one::<PathBuf>("inventory")
        .cloned()
        .unwrap_or_else(default_inventory_path);

    match matches.subcommand() {
        Some(("run", sub)) => {
            let inventory = load(&inventory_path)?;
            run_targets(&inventory, &target_names(sub)).await
        }
        Some(("plan", sub)) => {
            let inventory = load(&inventory_path)?;
            let targets = inventory.select(&target_names(sub))?;
            println!("{}", serde_json::to_string_pretty(&preview_targets(&targets))?);
            Ok(ExitCode::SUCCESS)
        }
        Some(("targets", _)) => {
            let inventory = load(&inventory_path)?;
            for target in &inventory.targets {
                let server = target.server_provider.map(|_| "digital_ocean").unwrap_or("-");
                let dns = target.dns_provider.map(|_| "route53").unwrap_or("-");
                println!("{}\tserver={server}\tdns={dns}", target.name);
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(("secret", sub)) => run_secret_cmd(sub),
        _ => bail!("expected a subcommand; see `berth --help`"),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).try_init();
}

fn build_cli() -> Command {
    let targets_arg = || {
        Arg::new("targets")
            .value_name("TARGET")
            .action(ArgAction::Append)
            .help("Target names from the inventory (default: all targets)")
    };

    Command::new("berth")
        .about("Provision droplets and DNS records, then configure the hosts as Dokku nodes")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("inventory")
                .long("inventory")
                .short('i')
                .global(true)
                .value_name("FILE")
                .env("BERTH_INVENTORY")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Inventory file (default: berth.yaml)"),
        )
        .subcommand_required(true)
        .subcommand(Command::new("run").about("Provision and configure targets").arg(targets_arg()))
        .subcommand(
            Command::new("plan")
                .about("Show what `run` would do without contacting any provider or host")
                .arg(targets_arg()),
        )
        .subcommand(Command::new("targets").about("List inventory targets"))
        .subcommand(
            Command::new("secret")
                .about("Manage secrets referenced as ${secret:NAME}")
                .subcommand_required(true)
                .subcommand(
                    Command::new("set")
                        .about("Store a secret in the OS keychain; the value is read from stdin")
                        .arg(Arg::new("name").required(true).value_name("NAME")),
                ),
        )
}

fn target_names(matches: &ArgMatches) -> Vec<String> {
    matches
        .get_many::<String>("targets")
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

fn load(path: &Path) -> Result<LoadedInventory> {
    load_inventory(path).with_context(|| format!("could not load inventory {}", path.display()))
}

#[derive(Serialize)]
struct RunSummary {
    targets: Vec<TargetReport>,
    hosts: Vec<HostReport>,
}

async fn run_targets(inventory: &LoadedInventory, names: &[String]) -> Result<ExitCode> {
    let targets = inventory.select(names)?;
    let plans = targets.iter().map(plan_target).collect::<Result<Vec<_>, _>>()?;
    let keys_dir = inventory.keys_dir();
    let keys = KeySet::load(&keys_dir).with_context(|| format!("could not load public keys from {}", keys_dir.display()))?;
    info!(targets = plans.len(), keys = keys.len(), "starting run");

    let (target_reports, handoff, group) = provision_all(&plans, &keys, &inventory.known_hosts_path()).await;
    let host_reports = configure_group(&group, &keys, &handoff).await;

    let failed_targets = target_reports.iter().filter(|r| r.status == PhaseStatus::Failed).count();
    let failed_hosts = host_reports.iter().filter(|r| r.status == PhaseStatus::Failed).count();
    let summary = RunSummary {
        targets: target_reports,
        hosts: host_reports,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if failed_targets + failed_hosts > 0 {
        warn!(failed_targets, failed_hosts, "run finished with failures");
        return Ok(ExitCode::FAILURE);
    }
    info!(hosts = summary.hosts.len(), "run finished");
    Ok(ExitCode::SUCCESS)
}

fn run_secret_cmd(matches: &ArgMatches) -> Result<ExitCode> {
    let Some(("set", sub)) = matches.subcommand() else {
        bail!("expected `berth secret set NAME`");
    };
    let name = sub.get_one::<String>("name").context("secret name is required")?;
    let mut value = String::new();
    io::stdin().lock().read_line(&mut value).context("could not read the secret from stdin")?;
    let value = value.trim_end_matches(['\r', '\n']);
    if value.is_empty() {
        bail!("refusing to store an empty secret");
    }
    berth_util::interpolation::store_secret(name, value)?;
    info!(%name, "secret stored");
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        build_cli().debug_assert();
    }

    #[test]
    fn run_accepts_multiple_targets() {
        let matches = build_cli()
            .try_get_matches_from(["berth", "run", "a.example.com", "b.example.com"])
            .expect("parses");
        let (_, sub) = matches.subcommand().expect("subcommand");
        assert_eq!(target_names(sub), vec!["a.example.com", "b.example.com"]);
    }

    #[test]
    fn inventory_flag_is_global() {
        let matches = build_cli()
            .try_get_matches_from(["berth", "plan", "--inventory", "/tmp/hosts.yaml"])
            .expect("parses");
        assert_eq!(matches.get_one::<PathBuf>("inventory"), Some(&PathBuf::from("/tmp/hosts.yaml")));
    }

    #[test]
    fn plan_and_targets_read_an_inventory_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("berth.yaml");
        std::fs::write(&path, "defaults:\n  dokku_version: v0.4.0\ntargets:\n  app.example.com: {}\n").expect("write");
        let inventory = load(&path).expect("loads");
        let preview = preview_targets(&inventory.select(&[]).expect("all"));
        assert_eq!(preview[0].target, "app.example.com");
    }
}
