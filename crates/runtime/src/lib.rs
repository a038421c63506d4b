//! Session runtime for a toolrelay worker.
//!
//! The [`ReconnectSupervisor`] opens one orchestrator session at a time. Each
//! session runs a dispatcher that feeds calls to a bounded [`WorkSet`], plus a
//! heartbeat that re-announces tools and a monitor that samples load.

pub mod dispatcher;
pub mod executor;
pub mod heartbeat;
pub mod load_monitor;
pub mod loopback;
pub mod options;
pub mod status;
pub mod supervisor;
pub mod workset;

pub use dispatcher::{DispatchEnd, Dispatcher};
pub use executor::{CallExecutor, ExecutionError, ExecutionReport};
pub use heartbeat::Heartbeat;
pub use load_monitor::{LoadMonitor, LoadReport};
pub use loopback::{Journal, LoopbackTransport};
pub use options::RuntimeOptions;
pub use status::{RuntimeStatus, SessionState, StatusSnapshot, WorkSetGauge};
pub use supervisor::{ReconnectSupervisor, SessionError};
pub use workset::{DrainSummary, WorkSet};
