//! # Berth Engine
//!
//! Drives the two phases of a berth run:
//!
//! 1. **Provisioning** ([`provision`]): per target, optionally upload keys and
//!    create or reuse a droplet, prune stale known-hosts entries, register
//!    DNS records, and hand the resolved address to phase two.
//! 2. **Configuration** ([`configure`]): per resolved host, converge the
//!    host into a Dokku node through an ordered list of idempotent steps.
//!
//! ## Architecture
//!
//! - **`config`**: inventory loading, interpolation, validation, and strategy selection
//! - **`provider`**: compute and DNS provider traits plus the strategy enums
//! - **`handoff`**: the address-keyed table carrying phase one results forward
//! - **`remote`**: the [`RemoteShell`] seam and its `ssh` implementation
//! - **`templates`**: `${{ ... }}` rendering for files written to hosts
//! - **`plan`**: a side-effect free preview of what a run would do

pub mod config;
pub mod configure;
pub mod handoff;
pub mod plan;
pub mod provider;
pub mod provision;
pub mod remote;
pub mod templates;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigError, LoadedInventory, TargetPlan, default_inventory_path, load_inventory, plan_target};
pub use configure::{ConfigureError, HostStep, configure_group, configure_group_with, configure_host};
pub use handoff::{HandoffEntry, HandoffTable};
pub use plan::{PlanPreview, PlannedAction, PlannedStep, preview_targets};
pub use provider::{ComputeProvider, DnsProvider, DnsRegistrar, Provisioner, ServerHandle, ServerRequest};
pub use provision::{ProvisionError, ProvisionedTarget, ProvisioningGroup, provision_all, provision_target};
pub use remote::{CommandOutput, RemoteError, RemoteShell, SshShell};
