//! Shared data model for the Anvil kernel pipeline: on-disk layout,
//! build requests and stats, event stream types, and cancellation.

mod cancel;
mod config;
mod context;
mod event;
mod process;
mod request;
mod stats;
mod version;

pub use cancel::CancelToken;
pub use config::{KernelConfigs, WorkspaceConfig};
pub use context::{ContextError, CoreContext};
pub use event::{BuildEvent, BuildPhase, EventSender};
pub use process::kill_child_group;
pub use request::{BuildRequest, VerificationLevel};
pub use stats::BuildStats;
pub use version::{ArchParseError, ArchSelection, Architecture, major};
