use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::ExportError;

/// The batch schedulers we can read output from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheduler {
    Slurm,
    Pbs,
    Lsf,
    Uge,
    Htcondor,
}

impl Scheduler {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheduler::Slurm => constants::SLURM,
            Scheduler::Pbs => constants::PBS,
            Scheduler::Lsf => constants::LSF,
            Scheduler::Uge => constants::UGE,
            Scheduler::Htcondor => constants::HTCONDOR,
        }
    }

    pub fn all() -> [Scheduler; 5] {
        [
            Scheduler::Slurm,
            Scheduler::Pbs,
            Scheduler::Lsf,
            Scheduler::Uge,
            Scheduler::Htcondor,
        ]
    }
}

impl fmt::Display for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheduler {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match constants::scheduler_alias_to_name(&s.trim().to_lowercase()) {
            constants::SLURM => Ok(Scheduler::Slurm),
            constants::PBS => Ok(Scheduler::Pbs),
            constants::LSF => Ok(Scheduler::Lsf),
            constants::UGE => Ok(Scheduler::Uge),
            constants::HTCONDOR => Ok(Scheduler::Htcondor),
            _ => Err(ExportError::UnknownScheduler(s.to_string())),
        }
    }
}

/// Which kind of scheduler output an adapter reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Jobs,
    Nodes,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Jobs => f.write_str("jobs"),
            RecordKind::Nodes => f.write_str("nodes"),
        }
    }
}

/// Job state in the canonical vocabulary shared by every scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Suspended,
    Completing,
    Completed,
    Cancelled,
    Failed,
    Timeout,
    NodeFail,
    OutOfMemory,
    Preempted,
    Held,
    Unknown(String),
}

impl From<&str> for JobState {
    fn from(s: &str) -> Self {
        // sacct prints "CANCELLED by 1234"
        let head = s.split_whitespace().next().unwrap_or("");
        match head.to_uppercase().as_str() {
            "PENDING" | "PD" | "IDLE" | "PEND" | "QW" => JobState::Pending,
            "RUNNING" | "R" | "RUN" => JobState::Running,
            "SUSPENDED" | "S" | "SUSP" | "USUSP" | "SSUSP" | "PSUSP" => JobState::Suspended,
            "COMPLETING" | "CG" => JobState::Completing,
            "COMPLETED" | "CD" | "DONE" => JobState::Completed,
            "CANCELLED" | "CA" | "REMOVED" => JobState::Cancelled,
            "FAILED" | "F" | "EXIT" => JobState::Failed,
            "TIMEOUT" | "TO" => JobState::Timeout,
            "NODE_FAIL" | "NF" => JobState::NodeFail,
            "OUT_OF_MEMORY" | "OOM" => JobState::OutOfMemory,
            "PREEMPTED" | "PR" => JobState::Preempted,
            "HELD" | "H" => JobState::Held,
            other => JobState::Unknown(other.to_string()),
        }
    }
}

impl JobState {
    /// Map an exit status (PBS `Exit_status`, UGE `exit_status`) to a final state
    pub fn from_exit_status(code: &str) -> Option<Self> {
        let code: i64 = code.trim().parse().ok()?;
        Some(if code == 0 {
            JobState::Completed
        } else {
            JobState::Failed
        })
    }

    /// HTCondor `JobStatus` integer codes
    pub fn from_condor_code(code: &str) -> Option<Self> {
        Some(match code.trim() {
            "1" => JobState::Pending,
            "2" => JobState::Running,
            "3" => JobState::Cancelled,
            "4" => JobState::Completed,
            "5" => JobState::Held,
            "6" => JobState::Running,
            "7" => JobState::Suspended,
            _ => return None,
        })
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Suspended => "SUSPENDED",
            JobState::Completing => "COMPLETING",
            JobState::Completed => "COMPLETED",
            JobState::Cancelled => "CANCELLED",
            JobState::Failed => "FAILED",
            JobState::Timeout => "TIMEOUT",
            JobState::NodeFail => "NODE_FAIL",
            JobState::OutOfMemory => "OUT_OF_MEMORY",
            JobState::Preempted => "PREEMPTED",
            JobState::Held => "HELD",
            JobState::Unknown(raw) => raw.as_str(),
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_from_str() {
        assert_eq!(JobState::from("RUNNING"), JobState::Running);
        assert_eq!(JobState::from("R"), JobState::Running);
        assert_eq!(JobState::from("CANCELLED by 4021"), JobState::Cancelled);
        assert_eq!(JobState::from("DONE"), JobState::Completed);
        assert_eq!(JobState::from("weird"), JobState::Unknown("WEIRD".to_string()));
    }

    #[test]
    fn test_job_state_from_codes() {
        assert_eq!(JobState::from_exit_status("0"), Some(JobState::Completed));
        assert_eq!(JobState::from_exit_status("137"), Some(JobState::Failed));
        assert_eq!(JobState::from_exit_status(""), None);
        assert_eq!(JobState::from_condor_code("4"), Some(JobState::Completed));
        assert_eq!(JobState::from_condor_code("3").unwrap().to_string(), "CANCELLED");
    }

    #[test]
    fn test_scheduler_from_str_accepts_aliases() {
        assert_eq!("SLURM".parse::<Scheduler>().unwrap(), Scheduler::Slurm);
        assert_eq!("torque".parse::<Scheduler>().unwrap(), Scheduler::Pbs);
        assert_eq!("sge".parse::<Scheduler>().unwrap(), Scheduler::Uge);
        assert_eq!("condor".parse::<Scheduler>().unwrap(), Scheduler::Htcondor);
        assert!("moab".parse::<Scheduler>().is_err());
    }
}
