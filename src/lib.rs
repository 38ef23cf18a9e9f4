//! # Software Factory Operator
//!
//! Reconciliation and lifecycle engine for a Zuul based Software Factory running on
//! Kubernetes.
//!
//! ## Overview
//!
//! The engine drives the actual state of the fleet toward a declared `SoftwareFactory`
//! specification:
//!
//! 1. **Ensure** - create-or-update of one managed object, gated by a content fingerprint
//! 2. **Step** - dependency-ordered pass over the component deployers
//! 3. **Conditions** - readiness aggregation and typed status conditions
//! 4. **Standalone loop** - bounded retry of Step when no managing controller is installed
//! 5. **Rotation** - live rotation of the keystore password and the authenticator secret
//! 6. **Backup/Restore** - export and recovery of credentials, keystore and database
//!
//! Two drivers share the same core: the `sf-operator` binary runs a kube-runtime
//! controller (managed mode) and `sfctl` runs one-shot standalone commands.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod error;
pub mod observability;
pub mod runtime;
pub mod store;

pub use error::{ReconcileError, Result, StoreError};
