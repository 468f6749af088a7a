//! Outcomes reported by the provisioning and configuration phases.

use serde::{Deserialize, Serialize};

/// Status of an executed step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step did not run, either gated off or blocked by an earlier failure.
    Skipped,
    /// Step executed and returned successfully.
    Succeeded,
    /// Step attempted but returned an error.
    Failed,
}

/// Result of running a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Step identifier, e.g. `fix-locale`.
    pub id: String,
    /// Final status of this step execution.
    pub status: StepStatus,
    /// Whether the step changed anything on the host or provider.
    pub changed: bool,
    /// Log lines captured while running the step.
    pub logs: Vec<String>,
}

impl StepResult {
    pub fn skipped(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: StepStatus::Skipped,
            changed: false,
            logs: vec![reason.into()],
        }
    }

    pub fn succeeded(id: impl Into<String>, changed: bool, logs: Vec<String>) -> Self {
        Self {
            id: id.into(),
            status: StepStatus::Succeeded,
            changed,
            logs,
        }
    }

    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: StepStatus::Failed,
            changed: false,
            logs: vec![error.into()],
        }
    }
}

/// Overall status of a phase for one target or host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Succeeded,
    Failed,
}

/// Phase 1 outcome for a single target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetReport {
    pub target: String,
    /// Address handed to the configuration phase; absent when provisioning failed.
    pub resolved_address: Option<String>,
    pub status: PhaseStatus,
    pub steps: Vec<StepResult>,
}

/// Phase 2 outcome for a single host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostReport {
    pub address: String,
    pub status: PhaseStatus,
    pub steps: Vec<StepResult>,
}

impl HostReport {
    /// Build a report, deriving the overall status from the step statuses.
    pub fn from_steps(address: impl Into<String>, steps: Vec<StepResult>) -> Self {
        let status = if steps.iter().any(|step| step.status == StepStatus::Failed) {
            PhaseStatus::Failed
        } else {
            PhaseStatus::Succeeded
        };
        Self {
            address: address.into(),
            status,
            steps,
        }
    }

    /// Returns the step with the given identifier, if it was recorded.
    pub fn step(&self, id: &str) -> Option<&StepResult> {
        self.steps.iter().find(|step| step.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_report_fails_when_any_step_failed() {
        let report = HostReport::from_steps(
            "203.0.113.5",
            vec![
                StepResult::succeeded("fix-locale", false, vec![]),
                StepResult::failed("install-packages", "apt-get exited with 100"),
                StepResult::skipped("upgrade-system", "blocked by failed step 'install-packages'"),
            ],
        );
        assert_eq!(report.status, PhaseStatus::Failed);
        assert_eq!(report.step("upgrade-system").map(|s| s.status), Some(StepStatus::Skipped));
    }

    #[test]
    fn step_status_serializes_snake_case() {
        let json = serde_json::to_string(&StepStatus::Succeeded).unwrap();
        assert_eq!(json, "\"succeeded\"");
    }
}
