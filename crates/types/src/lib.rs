// crates/types/src/lib.rs
//! Shared data model for the netops client: server-side tasks, per-device
//! results, the JSON response envelope, dashboard payloads, and the
//! client-only progress view models.

pub mod dashboard;
pub mod envelope;
pub mod stage;
pub mod task;
pub mod view;

pub use dashboard::*;
pub use envelope::*;
pub use stage::*;
pub use task::*;
pub use view::*;
