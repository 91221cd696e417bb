// crates/core/src/lib.rs
pub mod api;
pub mod config;
pub mod error;
pub mod execution;
pub mod poller;
pub mod progress;
pub mod retry;
pub mod store;

pub use api::{HttpClient, TaskApi};
pub use config::*;
pub use error::*;
pub use execution::{friendly_error_message, ExecutionCore};
pub use poller::{PollEvent, PollOptions, TaskPoller};
pub use progress::ProgressSimulation;
pub use retry::retry_request;
pub use store::{AppState, AppStore, Epoch, StatusKind, StatusMessage, StoreEvent};
