//! Phase two: converge a reachable host into a Dokku node.
//!
//! Steps run strictly in [`HostStep::ALL`] order. The first failure stops the
//! host; every later step is reported as skipped. Steps that edit files only
//! write when the converged contents differ, except the package, upgrade,
//! Dokku, identity, and site steps, which do their work on every run.

use std::sync::Arc;

use berth_types::{HostReport, StepResult, StepStatus};
use berth_util::{KeySet, ensure_authorized_keys, ensure_lines, redact_sensitive, shell_join, shell_quote};
use futures_util::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::handoff::HandoffTable;
use crate::provision::{ProvisionedTarget, ProvisioningGroup, blocked_result};
use crate::remote::{RemoteError, RemoteShell, SshShell};
use crate::templates::{TemplateError, render_default_site};

pub const ENVIRONMENT_FILE: &str = "/etc/environment";
pub const LOCALE_LINES: &[&str] = &["LC_ALL=en_US.UTF-8", "LANG=en_US.UTF-8"];
pub const ROOT_AUTHORIZED_KEYS: &str = "/root/.ssh/authorized_keys";
pub const PACKAGES: &[&str] = &["aufs-tools", "build-essential", "git", "software-properties-common", "lxc"];
pub const DOKKU_CHECKOUT: &str = "/root/dokku";
pub const DOKKU_USER: &str = "dokku";
pub const ACL_SENTINEL: &str = "/root/.berth-dokku-acl-done";
pub const VHOST_FILE: &str = "/home/dokku/VHOST";
pub const HOSTNAME_FILE: &str = "/home/dokku/HOSTNAME";
pub const SITE_AVAILABLE: &str = "/etc/nginx/sites-available/dokku-default";
pub const SITE_ENABLED: &str = "/etc/nginx/sites-enabled/dokku-default";
pub const STOCK_DEFAULT_SITE: &str = "/etc/nginx/sites-enabled/default";
pub const NGINX_RELOAD: &str = "service nginx reload";

const APT_ENV: &str = "DEBIAN_FRONTEND=noninteractive";

#[derive(Debug, Error)]
pub enum ConfigureError {
    #[error("{name} is not available for {address}: no handoff entry and no target setting")]
    MissingVariable { address: String, name: &'static str },

    #[error("could not determine the FQDN of {address}")]
    MissingFqdn { address: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Configuration steps in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStep {
    RecoverVariables,
    FixLocale,
    InstallRootKeys,
    InstallPackages,
    UpgradeSystem,
    InstallDokku,
    GrantDokkuKeys,
    WriteIdentity,
    EnableDefaultSite,
}

impl HostStep {
    pub const ALL: [HostStep; 9] = [
        HostStep::RecoverVariables,
        HostStep::FixLocale,
        HostStep::InstallRootKeys,
        HostStep::InstallPackages,
        HostStep::UpgradeSystem,
        HostStep::InstallDokku,
        HostStep::GrantDokkuKeys,
        HostStep::WriteIdentity,
        HostStep::EnableDefaultSite,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            HostStep::RecoverVariables => "recover-variables",
            HostStep::FixLocale => "fix-locale",
            HostStep::InstallRootKeys => "install-root-keys",
            HostStep::InstallPackages => "install-packages",
            HostStep::UpgradeSystem => "upgrade-system",
            HostStep::InstallDokku => "install-dokku",
            HostStep::GrantDokkuKeys => "grant-dokku-keys",
            HostStep::WriteIdentity => "write-identity",
            HostStep::EnableDefaultSite => "enable-default-site",
        }
    }

    /// One-line summary used by plan previews.
    pub fn describe(&self) -> &'static str {
        match self {
            HostStep::RecoverVariables => "read the Dokku repository and version from the handoff table or target",
            HostStep::FixLocale => "ensure LC_ALL and LANG are en_US.UTF-8 in /etc/environment",
            HostStep::InstallRootKeys => "authorize every local key for root",
            HostStep::InstallPackages => "apt-get install the latest build and container packages",
            HostStep::UpgradeSystem => "apt-get update and dist-upgrade",
            HostStep::InstallDokku => "clone or fetch Dokku, check out the pinned version, make install",
            HostStep::GrantDokkuKeys => "add every local key to the dokku ACL once per host",
            HostStep::WriteIdentity => "write the FQDN to /home/dokku/VHOST and HOSTNAME",
            HostStep::EnableDefaultSite => "render and enable the nginx default site, then reload nginx",
        }
    }
}

struct DokkuSource {
    repo: String,
    version: String,
}

struct StepOutcome {
    changed: bool,
    logs: Vec<String>,
}

impl StepOutcome {
    fn new(changed: bool, log: impl Into<String>) -> Self {
        Self {
            changed,
            logs: vec![log.into()],
        }
    }
}

/// Mutable state threaded through one host's steps.
struct HostRun<'a> {
    shell: &'a dyn RemoteShell,
    target: &'a ProvisionedTarget,
    keys: &'a KeySet,
    handoff: &'a HandoffTable,
    source: Option<DokkuSource>,
    fqdn: Option<String>,
}

/// Configure every host in `group` over ssh, concurrently.
pub async fn configure_group(group: &ProvisioningGroup, keys: &KeySet, handoff: &HandoffTable) -> Vec<HostReport> {
    configure_group_with(group, keys, handoff, |target: &ProvisionedTarget| -> Arc<dyn RemoteShell> {
        Arc::new(SshShell::new(
            target.address.clone(),
            target.descriptor.ssh_user.clone(),
            target.descriptor.ssh_port,
        ))
    })
    .await
}

/// Configure every host in `group` concurrently through shells from `connect`.
///
/// Reports come back in group order.
pub async fn configure_group_with<F>(group: &ProvisioningGroup, keys: &KeySet, handoff: &HandoffTable, connect: F) -> Vec<HostReport>
where
    F: Fn(&ProvisionedTarget) -> Arc<dyn RemoteShell>,
{
    let runs = group.iter().map(|target| {
        let shell = connect(target);
        async move { configure_host(shell.as_ref(), target, keys, handoff).await }
    });
    join_all(runs).await
}

/// Run every configuration step against one host.
pub async fn configure_host(shell: &dyn RemoteShell, target: &ProvisionedTarget, keys: &KeySet, handoff: &HandoffTable) -> HostReport {
    let address = target.address.as_str();
    info!(%address, target = %target.descriptor.name, "configuring host");

    let mut run = HostRun {
        shell,
        target,
        keys,
        handoff,
        source: None,
        fqdn: None,
    };
    let mut results = Vec::with_capacity(HostStep::ALL.len());
    let mut failed_step: Option<&'static str> = None;

    for step in HostStep::ALL {
        let step_id = step.id();
        if let Some(failed) = failed_step {
            debug!(%address, step_id, "step skipped after earlier failure");
            results.push(blocked_result(step_id, failed));
            continue;
        }

        debug!(%address, step_id, "step execution started");
        let result = match run.execute(step).await {
            Ok(outcome) => StepResult::succeeded(step_id, outcome.changed, outcome.logs),
            Err(error) => {
                failed_step = Some(step_id);
                StepResult::failed(step_id, redact_sensitive(&error.to_string()))
            }
        };

        match result.status {
            StepStatus::Succeeded => debug!(%address, step_id, changed = result.changed, "step execution succeeded"),
            StepStatus::Failed => warn!(%address, step_id, logs = ?result.logs, "step execution failed"),
            StepStatus::Skipped => info!(%address, step_id, "step execution skipped"),
        }
        results.push(result);
    }

    let report = HostReport::from_steps(address, results);
    info!(%address, status = ?report.status, "host configuration finished");
    report
}

impl HostRun<'_> {
    async fn execute(&mut self, step: HostStep) -> Result<StepOutcome, ConfigureError> {
        match step {
            HostStep::RecoverVariables => self.recover_variables(),
            HostStep::FixLocale => self.fix_locale().await,
            HostStep::InstallRootKeys => self.install_root_keys().await,
            HostStep::InstallPackages => self.install_packages().await,
            HostStep::UpgradeSystem => self.upgrade_system().await,
            HostStep::InstallDokku => self.install_dokku().await,
            HostStep::GrantDokkuKeys => self.grant_dokku_keys().await,
            HostStep::WriteIdentity => self.write_identity().await,
            HostStep::EnableDefaultSite => self.enable_default_site().await,
        }
    }

    fn address(&self) -> &str {
        &self.target.address
    }

    fn missing(&self, name: &'static str) -> ConfigureError {
        ConfigureError::MissingVariable {
            address: self.address().to_string(),
            name,
        }
    }

    fn recover_variables(&mut self) -> Result<StepOutcome, ConfigureError> {
        let entry = self.handoff.get(self.address());
        let descriptor = &self.target.descriptor;
        let pick = |from_handoff: Option<&String>, from_target: &Option<String>| {
            from_handoff
                .or(from_target.as_ref())
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let repo = pick(entry.and_then(|e| e.source_repo.as_ref()), &descriptor.dokku_git_repo).ok_or_else(|| self.missing("dokku_git_repo"))?;
        let version = pick(entry.and_then(|e| e.version_pin.as_ref()), &descriptor.dokku_version).ok_or_else(|| self.missing("dokku_version"))?;

        let origin = if entry.is_some() { "handoff table" } else { "target settings" };
        let log = format!("dokku {version} from {repo} ({origin})");
        self.source = Some(DokkuSource { repo, version });
        Ok(StepOutcome::new(false, log))
    }

    async fn fix_locale(&mut self) -> Result<StepOutcome, ConfigureError> {
        let current = self.shell.read_file(ENVIRONMENT_FILE).await?.unwrap_or_default();
        let (updated, changed) = ensure_lines(&current, LOCALE_LINES);
        if !changed {
            return Ok(StepOutcome::new(false, format!("{ENVIRONMENT_FILE} already sets the locale")));
        }
        self.shell.write_file(ENVIRONMENT_FILE, &updated).await?;
        Ok(StepOutcome::new(true, format!("updated locale in {ENVIRONMENT_FILE}")))
    }

    async fn install_root_keys(&mut self) -> Result<StepOutcome, ConfigureError> {
        let current = self.shell.read_file(ROOT_AUTHORIZED_KEYS).await?.unwrap_or_default();
        let (updated, changed) = ensure_authorized_keys(&current, self.keys.lines());
        if !changed {
            return Ok(StepOutcome::new(false, format!("all {} key(s) already authorized for root", self.keys.len())));
        }
        self.shell.write_file(ROOT_AUTHORIZED_KEYS, &updated).await?;
        self.shell
            .run(&format!("chmod 700 /root/.ssh && chmod 600 {ROOT_AUTHORIZED_KEYS}"))
            .await?;
        Ok(StepOutcome::new(true, format!("updated {ROOT_AUTHORIZED_KEYS}")))
    }

    async fn install_packages(&mut self) -> Result<StepOutcome, ConfigureError> {
        let command = format!("{APT_ENV} apt-get install -y {}", shell_join(PACKAGES.iter().copied()));
        self.shell.run(&command).await?;
        Ok(StepOutcome::new(true, format!("installed {}", PACKAGES.join(", "))))
    }

    async fn upgrade_system(&mut self) -> Result<StepOutcome, ConfigureError> {
        self.shell.run("apt-get update").await?;
        self.shell.run(&format!("{APT_ENV} apt-get -y dist-upgrade")).await?;
        Ok(StepOutcome::new(true, "package index refreshed and system upgraded"))
    }

    async fn install_dokku(&mut self) -> Result<StepOutcome, ConfigureError> {
        let source = self.source.as_ref().ok_or_else(|| self.missing("dokku_git_repo"))?;
        let mut logs = Vec::with_capacity(3);

        let version = shell_quote(&source.version);
        if self.shell.file_exists(&format!("{DOKKU_CHECKOUT}/.git")).await? {
            // Branch pins move upstream; check out what was just fetched, not the local branch.
            self.shell
                .run(&format!("git -C {DOKKU_CHECKOUT} fetch --tags origin {version}"))
                .await?;
            self.shell.run(&format!("git -C {DOKKU_CHECKOUT} checkout --force FETCH_HEAD")).await?;
            logs.push(format!("fetched and checked out {}", source.version));
        } else {
            self.shell
                .run(&format!("git clone {} {DOKKU_CHECKOUT}", shell_quote(&source.repo)))
                .await?;
            self.shell.run(&format!("git -C {DOKKU_CHECKOUT} checkout --force {version}")).await?;
            logs.push(format!("cloned {} at {}", source.repo, source.version));
        }
        self.shell.run(&format!("cd {DOKKU_CHECKOUT} && make install")).await?;
        logs.push("make install completed".to_string());

        Ok(StepOutcome { changed: true, logs })
    }

    async fn grant_dokku_keys(&mut self) -> Result<StepOutcome, ConfigureError> {
        if self.shell.file_exists(ACL_SENTINEL).await? {
            return Ok(StepOutcome::new(false, format!("{ACL_SENTINEL} present; ACL already granted")));
        }

        let mut logs = Vec::with_capacity(self.keys.len() + 1);
        for key in self.keys.iter() {
            let command = format!("sshcommand acl-add {DOKKU_USER} {}", shell_quote(&key.name));
            self.shell.run_with_input(&command, &format!("{}\n", key.line)).await?;
            logs.push(format!("granted '{}' to {DOKKU_USER}", key.name));
        }
        self.shell.write_file(ACL_SENTINEL, "granted by berth\n").await?;
        logs.push(format!("wrote {ACL_SENTINEL}"));
        Ok(StepOutcome { changed: true, logs })
    }

    async fn write_identity(&mut self) -> Result<StepOutcome, ConfigureError> {
        let fqdn = match self.target.descriptor.fqdn.as_deref().map(str::trim).filter(|fqdn| !fqdn.is_empty()) {
            Some(fqdn) => fqdn.to_string(),
            None => self.shell.run("hostname --fqdn").await?.stdout.trim().to_string(),
        };
        if fqdn.is_empty() {
            return Err(ConfigureError::MissingFqdn {
                address: self.address().to_string(),
            });
        }

        let contents = format!("{fqdn}\n");
        let mut changed = false;
        for path in [VHOST_FILE, HOSTNAME_FILE] {
            let previous = self.shell.read_file(path).await?;
            changed |= previous.as_deref() != Some(contents.as_str());
            self.shell.write_file(path, &contents).await?;
        }
        let log = format!("{VHOST_FILE} and {HOSTNAME_FILE} set to {fqdn}");
        self.fqdn = Some(fqdn);
        Ok(StepOutcome::new(changed, log))
    }

    async fn enable_default_site(&mut self) -> Result<StepOutcome, ConfigureError> {
        let fqdn = self.fqdn.as_deref().ok_or_else(|| ConfigureError::MissingFqdn {
            address: self.address().to_string(),
        })?;
        let site = render_default_site(fqdn)?;

        let mut logs = Vec::with_capacity(4);
        self.shell.write_file(SITE_AVAILABLE, &site).await?;
        logs.push(format!("rendered {SITE_AVAILABLE}"));
        if self.shell.remove_file(STOCK_DEFAULT_SITE).await? {
            logs.push(format!("removed {STOCK_DEFAULT_SITE}"));
        }
        self.shell.symlink(SITE_AVAILABLE, SITE_ENABLED).await?;
        logs.push(format!("linked {SITE_ENABLED}"));
        self.shell.run(NGINX_RELOAD).await?;
        logs.push("nginx reloaded".to_string());
        Ok(StepOutcome { changed: true, logs })
    }
}
