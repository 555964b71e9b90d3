use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BuildRequestStatus {
    Pending,
    Running,
    Completed,
    Failed,
    FailedIfNotCompleted,
    Canceled,
}

impl BuildRequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BuildRequestStatus::Pending | BuildRequestStatus::Running)
    }

    /// Valid worker-driven edges. Completion of a build request whose commit
    /// set still awaits roots is checked separately by the scheduler.
    pub fn can_transition_to(self, next: BuildRequestStatus) -> bool {
        use BuildRequestStatus::*;
        match (self, next) {
            (Pending, Running) => true,
            (Running, Completed) | (Running, Failed) | (Running, FailedIfNotCompleted) => true,
            (Pending, Canceled) | (Running, Canceled) => true,
            _ => false,
        }
    }
}

/// How repeated configurations are interleaved in the request order sequence.
///
/// `Alternating` and `PairedParallel` assign identical orders; the latter is a
/// dispatch-contract tag telling the build-triggering collaborator that all
/// requests sharing a repetition index are meant to run concurrently.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RepetitionType {
    Alternating,
    Sequential,
    PairedParallel,
}

impl RepetitionType {
    pub fn is_sequential(self) -> bool {
        matches!(self, RepetitionType::Sequential)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RepetitionType::Alternating => "alternating",
            RepetitionType::Sequential => "sequential",
            RepetitionType::PairedParallel => "paired-parallel",
        }
    }
}

impl std::str::FromStr for RepetitionType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alternating" => Ok(RepetitionType::Alternating),
            "sequential" => Ok(RepetitionType::Sequential),
            "paired-parallel" => Ok(RepetitionType::PairedParallel),
            _ => Err(SchedulerError::InvalidRepetitionType(s.to_string())),
        }
    }
}
