//! Side-effect free preview of a run.

use berth_types::{DnsProviderKind, ServerProviderKind, TargetDescriptor};
use serde::Serialize;

use crate::configure::{ACL_SENTINEL, HostStep};
use crate::provision::{CREATE_DNS_RECORDS, CREATE_SERVER, DNS_TTL, LOOKUP_DNS, PRUNE_KNOWN_HOSTS, RECORD_HANDOFF, UPLOAD_KEYS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedAction {
    Run,
    /// Runs only when a condition observed at run time holds.
    Conditional,
    Skip,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedStep {
    pub id: &'static str,
    pub action: PlannedAction,
    pub detail: String,
}

impl PlannedStep {
    fn new(id: &'static str, action: PlannedAction, detail: impl Into<String>) -> Self {
        Self {
            id,
            action,
            detail: detail.into(),
        }
    }
}

/// What a run would do for one target.
#[derive(Debug, Clone, Serialize)]
pub struct PlanPreview {
    pub target: String,
    pub server_provider: &'static str,
    pub dns_provider: &'static str,
    /// The address phase two will use; droplet addresses are only known at run time.
    pub address: String,
    pub provisioning: Vec<PlannedStep>,
    pub configuration: Vec<PlannedStep>,
}

pub fn preview_targets(targets: &[TargetDescriptor]) -> Vec<PlanPreview> {
    targets.iter().map(preview_target).collect()
}

fn preview_target(target: &TargetDescriptor) -> PlanPreview {
    let name = target.name.as_str();
    let mut provisioning = Vec::new();

    let (server_provider, address) = match (target.server_provider, target.digital_ocean.as_ref()) {
        (Some(ServerProviderKind::DigitalOcean), settings) => {
            let sizing = settings
                .map(|s| format!(" ({} {} in {})", s.size, s.image, s.region))
                .unwrap_or_default();
            provisioning.push(PlannedStep::new(UPLOAD_KEYS, PlannedAction::Run, "register every local key with DigitalOcean"));
            provisioning.push(PlannedStep::new(
                CREATE_SERVER,
                PlannedAction::Run,
                format!("reuse droplet '{name}' or create it{sizing}"),
            ));
            provisioning.push(PlannedStep::new(
                PRUNE_KNOWN_HOSTS,
                PlannedAction::Conditional,
                format!("only if the droplet is new: drop known_hosts lines for its IP and '{name}'"),
            ));
            provisioning.push(PlannedStep::new(RECORD_HANDOFF, PlannedAction::Run, "record repository and version for the droplet IP"));
            ("digital_ocean", "<droplet public IPv4>".to_string())
        }
        (None, _) => {
            for id in [UPLOAD_KEYS, CREATE_SERVER, PRUNE_KNOWN_HOSTS, RECORD_HANDOFF] {
                provisioning.push(PlannedStep::new(id, PlannedAction::Skip, "no server_provider selected"));
            }
            ("none", name.to_string())
        }
    };

    let dns_provider = match (target.server_provider, target.dns_provider) {
        (None, dns) => {
            for id in [LOOKUP_DNS, CREATE_DNS_RECORDS] {
                provisioning.push(PlannedStep::new(id, PlannedAction::Skip, "no server_provider selected"));
            }
            dns.map(|_| "route53").unwrap_or("none")
        }
        (Some(_), Some(DnsProviderKind::Route53)) => {
            provisioning.push(PlannedStep::new(LOOKUP_DNS, PlannedAction::Run, format!("look up A records for {name}")));
            provisioning.push(PlannedStep::new(
                CREATE_DNS_RECORDS,
                PlannedAction::Conditional,
                format!("only if none exist: {name} and *.{name} A records, ttl {DNS_TTL}"),
            ));
            "route53"
        }
        (Some(_), None) => {
            for id in [LOOKUP_DNS, CREATE_DNS_RECORDS] {
                provisioning.push(PlannedStep::new(id, PlannedAction::Skip, "no dns_provider selected"));
            }
            "none"
        }
    };

    let configuration = HostStep::ALL
        .iter()
        .map(|step| match step {
            HostStep::GrantDokkuKeys => PlannedStep::new(
                step.id(),
                PlannedAction::Conditional,
                format!("{} (unless {ACL_SENTINEL} exists)", step.describe()),
            ),
            _ => PlannedStep::new(step.id(), PlannedAction::Run, step.describe()),
        })
        .collect();

    PlanPreview {
        target: name.to_string(),
        server_provider,
        dns_provider,
        address,
        provisioning,
        configuration,
    }
}
