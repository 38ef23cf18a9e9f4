//! # Software Factory Operator
//!
//! Managed-mode driver: watches `SoftwareFactory` resources and converges each one
//! toward its declared spec, writing readiness into the resource status.

use anyhow::Result;
use sf_operator::runtime::{initialize, run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init_result = initialize().await?;
    run_watch_loop(init_result.reconciler, init_result.server_state).await;
    Ok(())
}
