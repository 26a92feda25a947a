//! Per-run state machine.
//!
//! ```text
//! pending -> extracted -> raw-stored -> transformed -> loaded -> completed
//!    \___________\____________\______________\____________\-----> failed
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manifest::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunPhase {
    Pending,
    Extracted,
    RawStored,
    Transformed,
    Loaded,
    Completed,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracted => "extracted",
            Self::RawStored => "raw-stored",
            Self::Transformed => "transformed",
            Self::Loaded => "loaded",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The single forward successor, if any.
    fn next(&self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Extracted),
            Self::Extracted => Some(Self::RawStored),
            Self::RawStored => Some(Self::Transformed),
            Self::Transformed => Some(Self::Loaded),
            Self::Loaded => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal transition for run {run_id}: {from} -> {to}")]
    Illegal {
        run_id: String,
        from: RunPhase,
        to: RunPhase,
    },
    #[error("run {run_id} is already {phase}")]
    Terminal { run_id: String, phase: RunPhase },
}

/// Outcome written to the run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failure,
    Partial,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Partial => "partial",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "partial" => Ok(Self::Partial),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// Why a run ended in `failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureInfo {
    pub stage: Stage,
    pub reason: String,
}

/// Tracks one run_id through its phases.
#[derive(Debug, Clone)]
pub struct RunTracker {
    run_id: String,
    phase: RunPhase,
    failure: Option<FailureInfo>,
}

impl RunTracker {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self::resume_at(run_id, RunPhase::Pending)
    }

    /// Start at the phase implied by already persisted inputs
    /// (`transform` resumes at raw-stored, `load` at transformed).
    pub fn resume_at(run_id: impl Into<String>, phase: RunPhase) -> Self {
        Self {
            run_id: run_id.into(),
            phase,
            failure: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn failure(&self) -> Option<&FailureInfo> {
        self.failure.as_ref()
    }

    /// Advance to `to`, which must be the direct successor of the current phase.
    pub fn advance(&mut self, to: RunPhase) -> Result<(), TransitionError> {
        if self.phase.is_terminal() {
            return Err(TransitionError::Terminal {
                run_id: self.run_id.clone(),
                phase: self.phase,
            });
        }
        if self.phase.next() != Some(to) {
            return Err(TransitionError::Illegal {
                run_id: self.run_id.clone(),
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }

    pub fn fail(&mut self, stage: Stage, reason: impl Into<String>) -> Result<(), TransitionError> {
        if self.phase.is_terminal() {
            return Err(TransitionError::Terminal {
                run_id: self.run_id.clone(),
                phase: self.phase,
            });
        }
        self.phase = RunPhase::Failed;
        self.failure = Some(FailureInfo {
            stage,
            reason: reason.into(),
        });
        Ok(())
    }

    /// Status for the run record: completed runs succeed, failed runs fail,
    /// anything stopped part-way is partial.
    pub fn status(&self) -> RunStatus {
        match self.phase {
            RunPhase::Completed => RunStatus::Success,
            RunPhase::Failed => RunStatus::Failure,
            _ => RunStatus::Partial,
        }
    }
}
