//! # Controller
//!
//! Reconciliation core and the lifecycle workflows built on it.
//!
//! - `ensure`, `orchestrator`, `readiness`, `conditions` - the convergence core
//! - `components` - one deployer per managed service
//! - `standalone` - bounded reconcile loop and ownership marker
//! - `reconciler` - managed-mode reconcile and status update
//! - `rotation`, `backup`, `wipe` - one-shot lifecycle workflows
//! - `retry` - shared polling utility used by every wait

pub mod backup;
pub mod components;
pub mod conditions;
pub mod context;
pub mod ensure;
pub mod orchestrator;
pub mod readiness;
pub mod reconciler;
pub mod remote;
pub mod retry;
pub mod rotation;
pub mod standalone;
pub mod validation;
pub mod wipe;

pub use context::OperationContext;
pub use orchestrator::{Orchestrator, StepOutcome};
pub use reconciler::{reconcile, Reconciler};
