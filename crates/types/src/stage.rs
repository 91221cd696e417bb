// crates/types/src/stage.rs
//! Client-facing execution stages.

use serde::{Deserialize, Serialize};

/// Stage of one execution as shown to the user.
///
/// `idle → submitting → submitted → connecting → executing | ai-analyzing →
/// completed | failed | cancelled → idle`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStage {
    #[default]
    Idle,
    Submitting,
    Submitted,
    Connecting,
    Executing,
    AiAnalyzing,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStage {
    /// Position in the stage sequence. A stage may only replace one of
    /// strictly lower rank; executing and ai-analyzing share a rank, and so
    /// do the three terminal stages.
    pub fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Submitting => 1,
            Self::Submitted => 2,
            Self::Connecting => 3,
            Self::Executing | Self::AiAnalyzing => 4,
            Self::Completed | Self::Failed | Self::Cancelled => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Submitting => "submitting",
            Self::Submitted => "submitted",
            Self::Connecting => "connecting",
            Self::Executing => "executing",
            Self::AiAnalyzing => "ai-analyzing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
