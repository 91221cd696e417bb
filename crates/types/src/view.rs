// crates/types/src/view.rs
//! Client-only progress view models, recomputed from polling responses or
//! from the local progress simulation.

use serde::{Deserialize, Serialize};

use crate::stage::ExecutionStage;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    pub visible: bool,
    pub percentage: f64,
    pub stage: ExecutionStage,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgressState {
    pub visible: bool,
    pub total: usize,
    pub completed: usize,
    pub stage: ExecutionStage,
    pub message: String,
}
