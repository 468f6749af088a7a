//! Phase one: create or reuse compute and DNS resources for each target.
//!
//! Every target yields a [`TargetReport`]. Targets that succeed also add a
//! [`ProvisionedTarget`] to the [`ProvisioningGroup`] phase two runs against.

use std::path::Path;

use berth_api::ApiError;
use berth_types::{DnsRecord, PhaseStatus, RecordType, StepResult, TargetDescriptor, TargetReport};
use berth_util::{KeySet, KnownHostsError, prune_known_hosts, redact_sensitive};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::TargetPlan;
use crate::handoff::{HandoffEntry, HandoffTable};
use crate::provider::{DnsRegistrar, Provisioner, ServerRequest};

pub const UPLOAD_KEYS: &str = "upload-keys";
pub const CREATE_SERVER: &str = "create-server";
pub const PRUNE_KNOWN_HOSTS: &str = "prune-known-hosts";
pub const RECORD_HANDOFF: &str = "record-handoff";
pub const LOOKUP_DNS: &str = "lookup-dns";
pub const CREATE_DNS_RECORDS: &str = "create-dns-records";

/// Phase one steps in execution order.
pub const PROVISION_STEPS: &[&str] = &[UPLOAD_KEYS, CREATE_SERVER, PRUNE_KNOWN_HOSTS, RECORD_HANDOFF, LOOKUP_DNS, CREATE_DNS_RECORDS];

/// TTL of the records registered for a new target, in seconds.
pub const DNS_TTL: u32 = 300;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{step}: {source}")]
    Api {
        step: &'static str,
        #[source]
        source: ApiError,
    },

    #[error(transparent)]
    KnownHosts(#[from] KnownHostsError),
}

impl ProvisionError {
    /// The step that raised this error.
    pub fn step(&self) -> &'static str {
        match self {
            ProvisionError::Api { step, .. } => step,
            ProvisionError::KnownHosts(_) => PRUNE_KNOWN_HOSTS,
        }
    }
}

fn api_error(step: &'static str) -> impl FnOnce(ApiError) -> ProvisionError {
    move |source| ProvisionError::Api { step, source }
}

/// A target ready for phase two.
#[derive(Debug, Clone)]
pub struct ProvisionedTarget {
    /// Address phase two connects to: the droplet IP or the target name.
    pub address: String,
    pub descriptor: TargetDescriptor,
}

/// Hosts phase two will configure, in provisioning order.
#[derive(Debug, Clone, Default)]
pub struct ProvisioningGroup {
    members: Vec<ProvisionedTarget>,
}

impl ProvisioningGroup {
    pub fn push(&mut self, member: ProvisionedTarget) {
        self.members.push(member);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProvisionedTarget> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Provision every target in order.
pub async fn provision_all(plans: &[TargetPlan], keys: &KeySet, known_hosts: &Path) -> (Vec<TargetReport>, HandoffTable, ProvisioningGroup) {
    let mut handoff = HandoffTable::new();
    let mut group = ProvisioningGroup::default();
    let mut reports = Vec::with_capacity(plans.len());
    for plan in plans {
        reports.push(provision_target(plan, keys, known_hosts, &mut handoff, &mut group).await);
    }
    (reports, handoff, group)
}

/// Provision a single target.
///
/// A failure stops the target: later steps are reported as skipped and the
/// target never joins `group`.
pub async fn provision_target(
    plan: &TargetPlan,
    keys: &KeySet,
    known_hosts: &Path,
    handoff: &mut HandoffTable,
    group: &mut ProvisioningGroup,
) -> TargetReport {
    let name = plan.descriptor.name.clone();
    info!(target = %name, provisioner = plan.provisioner.label(), dns = plan.dns.label(), "provisioning target");

    let mut steps = Vec::with_capacity(PROVISION_STEPS.len());
    match run_provisioning(plan, keys, known_hosts, handoff, &mut steps).await {
        Ok(address) => {
            info!(target = %name, %address, "target provisioned");
            group.push(ProvisionedTarget {
                address: address.clone(),
                descriptor: plan.descriptor.clone(),
            });
            TargetReport {
                target: name,
                resolved_address: Some(address),
                status: PhaseStatus::Succeeded,
                steps,
            }
        }
        Err(error) => {
            let failed_step = error.step();
            let message = redact_sensitive(&error.to_string());
            warn!(target = %name, step = failed_step, error = %message, "provisioning failed");
            steps.push(StepResult::failed(failed_step, message));
            block_remaining(&mut steps, PROVISION_STEPS, failed_step);
            TargetReport {
                target: name,
                resolved_address: None,
                status: PhaseStatus::Failed,
                steps,
            }
        }
    }
}

async fn run_provisioning(
    plan: &TargetPlan,
    keys: &KeySet,
    known_hosts: &Path,
    handoff: &mut HandoffTable,
    steps: &mut Vec<StepResult>,
) -> Result<String, ProvisionError> {
    let descriptor = &plan.descriptor;
    let name = descriptor.name.as_str();

    let address = match &plan.provisioner {
        Provisioner::None => {
            for &step in PROVISION_STEPS {
                steps.push(StepResult::skipped(step, "no server_provider selected"));
            }
            return Ok(name.to_string());
        }
        Provisioner::DigitalOcean { provider, settings } => {
            let mut key_ids = Vec::with_capacity(keys.len());
            for key in keys.iter() {
                let key_id = provider.upload_key(&key.name, &key.line).await.map_err(api_error(UPLOAD_KEYS))?;
                debug!(target = %name, key = %key.name, key_id, "key registered");
                key_ids.push(key_id);
            }
            steps.push(StepResult::succeeded(
                UPLOAD_KEYS,
                false,
                vec![format!("{} key(s) registered with the provider", key_ids.len())],
            ));

            let request = ServerRequest::from_settings(name, key_ids, settings);
            let server = provider.create_or_get_server(&request).await.map_err(api_error(CREATE_SERVER))?;
            let server_log = if server.changed {
                format!("created server '{name}' at {}", server.ip_address)
            } else {
                format!("reusing server '{name}' at {}", server.ip_address)
            };
            steps.push(StepResult::succeeded(CREATE_SERVER, server.changed, vec![server_log]));

            if server.changed {
                let removed = prune_known_hosts(known_hosts, &[server.ip_address.as_str(), name])?;
                steps.push(StepResult::succeeded(
                    PRUNE_KNOWN_HOSTS,
                    removed > 0,
                    vec![format!("removed {removed} line(s) from {}", known_hosts.display())],
                ));
            } else {
                steps.push(StepResult::skipped(PRUNE_KNOWN_HOSTS, "server already existed"));
            }

            handoff.record(HandoffEntry {
                source_repo: descriptor.dokku_git_repo.clone(),
                version_pin: descriptor.dokku_version.clone(),
                resolved_address: server.ip_address.clone(),
            });
            steps.push(StepResult::succeeded(
                RECORD_HANDOFF,
                false,
                vec![format!("handoff recorded for {}", server.ip_address)],
            ));
            server.ip_address
        }
    };

    match &plan.dns {
        DnsRegistrar::None => {
            for step in [LOOKUP_DNS, CREATE_DNS_RECORDS] {
                steps.push(StepResult::skipped(step, "no dns_provider selected"));
            }
        }
        DnsRegistrar::Route53 { provider } => {
            let existing = provider.get_records(name, name, RecordType::A).await.map_err(api_error(LOOKUP_DNS))?;
            steps.push(StepResult::succeeded(
                LOOKUP_DNS,
                false,
                vec![format!("{} existing A record set(s) for {name}", existing.len())],
            ));

            if existing.is_empty() {
                let mut logs = Vec::with_capacity(2);
                for record_name in [name.to_string(), format!("*.{name}")] {
                    let record = DnsRecord::new(record_name, RecordType::A, address.clone(), DNS_TTL);
                    provider
                        .create_record(name, &record, true)
                        .await
                        .map_err(api_error(CREATE_DNS_RECORDS))?;
                    info!(target = %name, record = %record.name, %address, "created A record");
                    logs.push(format!("{} A {} (ttl {})", record.name, address, DNS_TTL));
                }
                steps.push(StepResult::succeeded(CREATE_DNS_RECORDS, true, logs));
            } else {
                steps.push(StepResult::skipped(CREATE_DNS_RECORDS, format!("A record for {name} already exists")));
            }
        }
    }

    Ok(address)
}

/// Append a skipped result for every step in `order` after `failed_step`.
pub(crate) fn block_remaining(steps: &mut Vec<StepResult>, order: &[&str], failed_step: &str) {
    let Some(position) = order.iter().position(|step| *step == failed_step) else {
        return;
    };
    for step in &order[position + 1..] {
        steps.push(blocked_result(step, failed_step));
    }
}

pub(crate) fn blocked_result(step_id: &str, failed_step: &str) -> StepResult {
    StepResult::skipped(step_id, format!("step '{step_id}' skipped because step '{failed_step}' failed earlier in the run"))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use berth_types::{DigitalOceanSettings, StepStatus};
    use berth_util::PublicKey;

    use super::*;
    use crate::testing::{FakeCompute, FakeDns};

    fn keys() -> KeySet {
        KeySet::from_keys(vec![
            PublicKey::new("alice", "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAlice alice@example.com"),
            PublicKey::new("bob", "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIBob bob@example.com"),
        ])
    }

    fn descriptor() -> TargetDescriptor {
        let mut descriptor = TargetDescriptor::named("example.com");
        descriptor.dokku_git_repo = Some("https://github.com/dokku/dokku.git".into());
        descriptor.dokku_version = Some("v0.4.0".into());
        descriptor
    }

    fn settings() -> DigitalOceanSettings {
        DigitalOceanSettings {
            api_token: Some("dop_v1_test".into()),
            region: "nyc3".into(),
            image: "ubuntu-14-04-x64".into(),
            size: "1gb".into(),
            private_networking: false,
            backups_enabled: false,
        }
    }

    fn droplet_plan(compute: &Arc<FakeCompute>) -> TargetPlan {
        TargetPlan {
            descriptor: descriptor(),
            provisioner: Provisioner::DigitalOcean {
                provider: compute.clone(),
                settings: settings(),
            },
            dns: DnsRegistrar::None,
        }
    }

    fn step<'a>(report: &'a TargetReport, id: &str) -> &'a StepResult {
        report.steps.iter().find(|step| step.id == id).expect("step recorded")
    }

    #[tokio::test]
    async fn no_server_provider_uses_target_name() {
        let dir = tempfile::tempdir().unwrap();
        let known_hosts = dir.path().join("known_hosts");
        fs::write(&known_hosts, "example.com ssh-ed25519 AAAA\n").unwrap();

        let plan = TargetPlan {
            descriptor: descriptor(),
            provisioner: Provisioner::None,
            dns: DnsRegistrar::None,
        };
        let mut handoff = HandoffTable::new();
        let mut group = ProvisioningGroup::default();
        let report = provision_target(&plan, &keys(), &known_hosts, &mut handoff, &mut group).await;

        assert_eq!(report.status, PhaseStatus::Succeeded);
        assert_eq!(report.resolved_address.as_deref(), Some("example.com"));
        assert!(handoff.is_empty());
        assert_eq!(group.len(), 1);
        assert_eq!(fs::read_to_string(&known_hosts).unwrap(), "example.com ssh-ed25519 AAAA\n");
        assert_eq!(step(&report, CREATE_SERVER).status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn new_droplet_prunes_known_hosts_and_records_handoff() {
        let dir = tempfile::tempdir().unwrap();
        let known_hosts = dir.path().join("known_hosts");
        fs::write(
            &known_hosts,
            "203.0.113.5 ssh-ed25519 AAAAold\n203.0.113.50 ssh-ed25519 AAAAkeep\nexample.com,203.0.113.5 ssh-rsa AAAAold\n",
        )
        .unwrap();

        let compute = Arc::new(FakeCompute::new("203.0.113.5"));
        let mut handoff = HandoffTable::new();
        let mut group = ProvisioningGroup::default();
        let report = provision_target(&droplet_plan(&compute), &keys(), &known_hosts, &mut handoff, &mut group).await;

        assert_eq!(report.status, PhaseStatus::Succeeded);
        assert_eq!(report.resolved_address.as_deref(), Some("203.0.113.5"));
        assert!(step(&report, CREATE_SERVER).changed);
        assert_eq!(compute.uploaded_keys(), vec!["alice", "bob"]);
        assert_eq!(fs::read_to_string(&known_hosts).unwrap(), "203.0.113.50 ssh-ed25519 AAAAkeep\n");

        let entry = handoff.get("203.0.113.5").expect("handoff entry");
        assert_eq!(entry.version_pin.as_deref(), Some("v0.4.0"));
        assert_eq!(group.iter().next().map(|m| m.address.as_str()), Some("203.0.113.5"));
    }

    #[tokio::test]
    async fn second_run_reuses_droplet_without_pruning() {
        let dir = tempfile::tempdir().unwrap();
        let known_hosts = dir.path().join("known_hosts");
        let compute = Arc::new(FakeCompute::new("203.0.113.5"));
        let plan = droplet_plan(&compute);

        let mut handoff = HandoffTable::new();
        let mut group = ProvisioningGroup::default();
        provision_target(&plan, &keys(), &known_hosts, &mut handoff, &mut group).await;

        let trusted = "203.0.113.5 ssh-ed25519 AAAAtrusted\n";
        fs::write(&known_hosts, trusted).unwrap();
        let second = provision_target(&plan, &keys(), &known_hosts, &mut handoff, &mut group).await;

        assert_eq!(second.status, PhaseStatus::Succeeded);
        assert!(!step(&second, CREATE_SERVER).changed);
        assert_eq!(step(&second, PRUNE_KNOWN_HOSTS).status, StepStatus::Skipped);
        assert_eq!(fs::read_to_string(&known_hosts).unwrap(), trusted);
        assert_eq!(compute.servers_created(), 1);
    }

    #[tokio::test]
    async fn key_upload_failure_stops_before_server_creation() {
        let dir = tempfile::tempdir().unwrap();
        let compute = Arc::new(FakeCompute::new("203.0.113.5").failing_key_upload());
        let mut handoff = HandoffTable::new();
        let mut group = ProvisioningGroup::default();
        let report = provision_target(
            &droplet_plan(&compute),
            &keys(),
            &dir.path().join("known_hosts"),
            &mut handoff,
            &mut group,
        )
        .await;

        assert_eq!(report.status, PhaseStatus::Failed);
        assert_eq!(step(&report, UPLOAD_KEYS).status, StepStatus::Failed);
        assert_eq!(step(&report, CREATE_SERVER).status, StepStatus::Skipped);
        assert_eq!(step(&report, CREATE_DNS_RECORDS).status, StepStatus::Skipped);
        assert_eq!(compute.servers_created(), 0);
        assert!(group.is_empty());
    }

    #[tokio::test]
    async fn existing_a_record_skips_dns_creation() {
        let dir = tempfile::tempdir().unwrap();
        let compute = Arc::new(FakeCompute::new("203.0.113.5"));
        let dns = Arc::new(FakeDns::with_records(vec![DnsRecord::new("example.com", RecordType::A, "198.51.100.7", 300)]));
        let mut plan = droplet_plan(&compute);
        plan.dns = DnsRegistrar::Route53 { provider: dns.clone() };

        let mut handoff = HandoffTable::new();
        let mut group = ProvisioningGroup::default();
        let report = provision_target(&plan, &keys(), &dir.path().join("known_hosts"), &mut handoff, &mut group).await;

        assert_eq!(report.status, PhaseStatus::Succeeded);
        assert_eq!(step(&report, CREATE_DNS_RECORDS).status, StepStatus::Skipped);
        assert!(dns.created().is_empty());
    }

    #[tokio::test]
    async fn missing_a_record_creates_apex_and_wildcard() {
        let dir = tempfile::tempdir().unwrap();
        let compute = Arc::new(FakeCompute::new("203.0.113.5"));
        let dns = Arc::new(FakeDns::default());
        let mut plan = droplet_plan(&compute);
        plan.dns = DnsRegistrar::Route53 { provider: dns.clone() };

        let mut handoff = HandoffTable::new();
        let mut group = ProvisioningGroup::default();
        let report = provision_target(&plan, &keys(), &dir.path().join("known_hosts"), &mut handoff, &mut group).await;

        assert_eq!(report.status, PhaseStatus::Succeeded);
        assert!(step(&report, CREATE_DNS_RECORDS).changed);
        assert_eq!(
            dns.created(),
            vec![
                (
                    "example.com".to_string(),
                    DnsRecord::new("example.com", RecordType::A, "203.0.113.5", 300),
                    true
                ),
                (
                    "example.com".to_string(),
                    DnsRecord::new("*.example.com", RecordType::A, "203.0.113.5", 300),
                    true
                ),
            ]
        );
    }

    #[tokio::test]
    async fn dns_provider_without_server_provider_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let dns = Arc::new(FakeDns::default());
        let plan = TargetPlan {
            descriptor: descriptor(),
            provisioner: Provisioner::None,
            dns: DnsRegistrar::Route53 { provider: dns.clone() },
        };
        let mut handoff = HandoffTable::new();
        let mut group = ProvisioningGroup::default();
        let report = provision_target(&plan, &keys(), &dir.path().join("known_hosts"), &mut handoff, &mut group).await;

        assert_eq!(report.status, PhaseStatus::Succeeded);
        assert_eq!(report.resolved_address.as_deref(), Some("example.com"));
        assert_eq!(step(&report, LOOKUP_DNS).status, StepStatus::Skipped);
        assert_eq!(step(&report, CREATE_DNS_RECORDS).status, StepStatus::Skipped);
        assert_eq!(dns.lookups(), 0);
        assert!(dns.created().is_empty());
        assert_eq!(group.len(), 1);
    }

    #[tokio::test]
    async fn provision_all_keeps_inventory_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = descriptor();
        first.name = "a.example.com".into();
        let mut second = descriptor();
        second.name = "b.example.com".into();
        let plans = vec![
            TargetPlan {
                descriptor: first,
                provisioner: Provisioner::None,
                dns: DnsRegistrar::None,
            },
            TargetPlan {
                descriptor: second,
                provisioner: Provisioner::None,
                dns: DnsRegistrar::None,
            },
        ];
        let (reports, _, group) = provision_all(&plans, &keys(), &dir.path().join("known_hosts")).await;
        let targets: Vec<_> = reports.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(targets, vec!["a.example.com", "b.example.com"]);
        assert_eq!(group.len(), 2);
    }
}
