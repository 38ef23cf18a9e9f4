//! # Orchestrator
//!
//! Dependency-ordered pass over the component deployers.
//!
//! Components are grouped by [`ComponentId::level`]. Within a pass, a level is only
//! attempted once every component of every earlier level reported ready; level-mates
//! are all attempted even when one of them is not ready. Components of a blocked level
//! are recorded as `Unstarted` and their deployers are not called.
//!
//! The orchestrator keeps no state between passes: the readiness map is rebuilt on
//! every call to [`Orchestrator::step`].

use crate::controller::components::{standard_deployers, ComponentDeployer, DeployEnv};
use crate::controller::conditions::update_conditions;
use crate::controller::readiness::{ComponentState, Readiness, ReadinessMap, MAX_LEVEL};
use crate::controller::validation::validate_spec;
use crate::crd::Condition;
use crate::error::Result;
use crate::observability::metrics;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Outcome of one Step pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub readiness: ReadinessMap,
}

impl StepOutcome {
    /// Overall readiness: every component reported ready in this pass
    pub fn ready(&self) -> bool {
        self.readiness.all_ready()
    }

    /// Mirror the attempted components into status conditions
    ///
    /// Components that were not attempted in this pass keep their previous condition.
    /// Returns true when any condition changed.
    pub fn apply_conditions(&self, conditions: &mut Vec<Condition>) -> bool {
        let mut changed = false;
        for (id, readiness) in self.readiness.iter() {
            if readiness.state == ComponentState::Unstarted {
                continue;
            }
            changed |= update_conditions(conditions, id.as_str(), readiness.is_ready());
        }
        changed
    }
}

/// Runs the component deployers level by level
pub struct Orchestrator {
    deployers: Vec<Box<dyn ComponentDeployer>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<_> = self.deployers.iter().map(|d| d.id()).collect();
        f.debug_struct("Orchestrator")
            .field("deployers", &ids)
            .finish()
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::standard()
    }
}

impl Orchestrator {
    /// Orchestrator over every component of a Software Factory
    pub fn standard() -> Self {
        Self::from_deployers(standard_deployers())
    }

    pub fn from_deployers(deployers: Vec<Box<dyn ComponentDeployer>>) -> Self {
        Self { deployers }
    }

    /// Run one pass
    ///
    /// Fails only when the declared spec is invalid. A deployer error never aborts the
    /// pass: the component is recorded as waiting with the error as its reason.
    pub async fn step(&self, env: &DeployEnv<'_>) -> Result<StepOutcome> {
        let span = info_span!("sf.step", namespace = %env.ctx.namespace, dry_run = env.ctx.dry_run);
        self.run_levels(env).instrument(span).await
    }

    async fn run_levels(&self, env: &DeployEnv<'_>) -> Result<StepOutcome> {
        validate_spec(env.spec)?;

        let start = Instant::now();
        let mut readiness = ReadinessMap::new();
        let mut blocked_by: Option<u8> = None;

        for level in 0..=MAX_LEVEL {
            let deployers = self.deployers.iter().filter(|d| d.id().level() == level);

            if let Some(blocking) = blocked_by {
                for deployer in deployers {
                    readiness.set(deployer.id(), Readiness::unstarted(blocking));
                }
                continue;
            }

            let mut level_ready = true;
            for deployer in deployers {
                let id = deployer.id();
                let result = match deployer.deploy(env).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(component = %id, error = %e, "Unable to determine readiness");
                        Readiness::waiting(e.to_string())
                    }
                };
                if result.is_ready() {
                    debug!(component = %id, "Component ready");
                } else {
                    info!(component = %id, reason = %result.reason, "Component not ready");
                    level_ready = false;
                }
                readiness.set(id, result);
            }

            if !level_ready {
                blocked_by = Some(level);
            }
        }

        for (id, r) in readiness.iter() {
            metrics::set_component_ready(id.as_str(), r.is_ready());
        }
        let outcome = StepOutcome { readiness };
        metrics::increment_steps(outcome.ready());
        metrics::observe_step_duration(start.elapsed().as_secs_f64());

        if outcome.ready() {
            info!("All components ready");
        } else {
            let pending: Vec<&str> = outcome
                .readiness
                .pending()
                .into_iter()
                .map(|id| id.as_str())
                .collect();
            info!(pending = ?pending, "Deployment not ready yet");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::context::OperationContext;
    use crate::controller::readiness::ComponentId;
    use crate::crd::SoftwareFactorySpec;
    use crate::error::ReconcileError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct Fixed(ComponentId, bool);

    #[async_trait]
    impl ComponentDeployer for Fixed {
        fn id(&self) -> ComponentId {
            self.0
        }

        async fn deploy(&self, _env: &DeployEnv<'_>) -> Result<Readiness> {
            if self.1 {
                Ok(Readiness::ready())
            } else {
                Err(ReconcileError::RemoteExec("unreachable".to_string()))
            }
        }
    }

    fn spec() -> SoftwareFactorySpec {
        SoftwareFactorySpec {
            fqdn: "sfop.me".to_string(),
            ..SoftwareFactorySpec::default()
        }
    }

    #[tokio::test]
    async fn test_deployer_error_is_waiting() {
        let store = MemoryStore::new();
        let ctx = OperationContext::new("sf");
        let spec = spec();
        let env = DeployEnv::new(&ctx, &store, &spec);
        let orchestrator = Orchestrator::from_deployers(vec![
            Box::new(Fixed(ComponentId::MariaDb, false)),
            Box::new(Fixed(ComponentId::Gateway, true)),
            Box::new(Fixed(ComponentId::Zookeeper, true)),
        ]);

        let outcome = orchestrator.step(&env).await.unwrap();
        let mariadb = outcome.readiness.get(ComponentId::MariaDb).unwrap();
        assert_eq!(mariadb.state, ComponentState::Waiting);
        assert!(mariadb.reason.contains("unreachable"));
        assert!(outcome.readiness.is_ready(ComponentId::Gateway));
        assert_eq!(
            outcome.readiness.get(ComponentId::Zookeeper).map(|r| r.state),
            Some(ComponentState::Unstarted)
        );
        assert!(!outcome.ready());
    }

    #[test]
    fn test_unstarted_components_keep_their_condition() {
        let mut readiness = ReadinessMap::new();
        readiness.set(ComponentId::MariaDb, Readiness::waiting("rollout"));
        readiness.set(ComponentId::Zookeeper, Readiness::unstarted(1));
        let outcome = StepOutcome { readiness };

        let mut conditions = Vec::new();
        assert!(outcome.apply_conditions(&mut conditions));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].r#type, "mariadb");
        assert!(!outcome.apply_conditions(&mut conditions));
    }

    #[tokio::test]
    async fn test_invalid_spec_halts_before_deployers() {
        let store = MemoryStore::new();
        let ctx = OperationContext::new("sf");
        let mut spec = spec();
        spec.fqdn = String::new();
        let env = DeployEnv::new(&ctx, &store, &spec);
        let result = Orchestrator::standard().step(&env).await;
        assert!(matches!(result, Err(ReconcileError::InvalidSpec(_))));
        assert_eq!(store.write_count(), 0);
    }
}
