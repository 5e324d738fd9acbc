use std::str::FromStr;
use serde::Deserialize;

/// Identifier of a stage in the physical plan.
pub type StageId = String;

/// Opaque identifier of a remote executor.
pub type ExecutorId = String;

/// Launch counter of a task group. `0` means "never launched".
pub type Attempt = u32;

/// What happens to in-flight task groups once a job failure is escalated.
///
/// - `CancelRunning`: send a cancel for every in-flight attempt and reclaim
///   its slot immediately (default).
/// - `LetRunningFinish`: leave in-flight attempts alone; their final reports
///   are still recorded and their slots are released as they report. No new
///   task group is launched either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationPolicy {
    CancelRunning,
    LetRunningFinish,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        EscalationPolicy::CancelRunning
    }
}

impl FromStr for EscalationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cancel_running" => Ok(EscalationPolicy::CancelRunning),
            "let_running_finish" => Ok(EscalationPolicy::LetRunningFinish),
            other => Err(format!(
                "invalid escalation: {other} (expected \"cancel_running\" or \"let_running_finish\")"
            )),
        }
    }
}

/// Which executor-placement policy the scheduler uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementPolicy {
    /// Prefer executors holding upstream output, then any free slot.
    Locality,
    /// Ignore locality; pick the executor with the most free slots.
    LeastLoaded,
}

impl Default for PlacementPolicy {
    fn default() -> Self {
        PlacementPolicy::Locality
    }
}

impl FromStr for PlacementPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "locality" => Ok(PlacementPolicy::Locality),
            "least_loaded" => Ok(PlacementPolicy::LeastLoaded),
            other => Err(format!(
                "invalid placement: {other} (expected \"locality\" or \"least_loaded\")"
            )),
        }
    }
}
