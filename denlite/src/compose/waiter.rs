//! Condition-based readiness waiter for service dependencies.
//!
//! Before a service is provisioned, every declared dependency condition
//! must hold. Checks for one service run concurrently and all run to
//! completion; the first error in declaration order is returned after
//! every check has finished. Budgets are bounded poll counts, not
//! wall-clock deadlines.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::errors::{DenliteError, DenliteResult};
use crate::runtime::{ContainerId, ContainerRuntime, HealthStatus};

/// Interval between state polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Consecutive positive observations required before a condition settles.
/// Guards against a container that starts and immediately crashes.
pub const SETTLE_POLLS: u32 = 5;

/// Consecutive non-healthy observations tolerated before `Healthy` times
/// out.
pub const MAX_UNHEALTHY_POLLS: u32 = 120;

/// Readiness condition attached to a service dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyCondition {
    Started,
    Healthy,
    CompletedSuccessfully,
}

impl std::str::FromStr for DependencyCondition {
    type Err = DenliteError;

    fn from_str(s: &str) -> DenliteResult<Self> {
        match s {
            "service_started" => Ok(DependencyCondition::Started),
            "service_healthy" => Ok(DependencyCondition::Healthy),
            "service_completed_successfully" => Ok(DependencyCondition::CompletedSuccessfully),
            other => Err(DenliteError::UnknownCondition(other.to_string())),
        }
    }
}

/// One (dependency, condition) pair to wait on.
#[derive(Debug, Clone)]
pub struct DependencyWait {
    /// Service name, for error reporting.
    pub service: String,
    /// Container the dependency runs in.
    pub container: ContainerId,
    pub condition: DependencyCondition,
}

/// Block until every pair's condition holds.
pub async fn wait_for_dependencies(
    runtime: Arc<dyn ContainerRuntime>,
    waits: Vec<DependencyWait>,
) -> DenliteResult<()> {
    let checks = waits.into_iter().map(|wait| {
        let runtime = runtime.clone();
        async move { check_condition(runtime, wait).await }
    });

    // No early cancellation: siblings run to completion and the first
    // error in declaration order wins.
    for result in join_all(checks).await {
        result?;
    }
    Ok(())
}

async fn check_condition(
    runtime: Arc<dyn ContainerRuntime>,
    wait: DependencyWait,
) -> DenliteResult<()> {
    tracing::debug!(service = %wait.service, condition = ?wait.condition, "waiting on dependency");
    match wait.condition {
        DependencyCondition::Started => wait_started(runtime, &wait).await,
        DependencyCondition::Healthy => wait_healthy(runtime, &wait).await,
        DependencyCondition::CompletedSuccessfully => wait_completed(runtime, &wait).await,
    }
}

/// Running for `SETTLE_POLLS` consecutive polls; observed not-running
/// before settling is fatal.
async fn wait_started(
    runtime: Arc<dyn ContainerRuntime>,
    wait: &DependencyWait,
) -> DenliteResult<()> {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let mut settled = 0;
    loop {
        ticker.tick().await;
        let state = runtime.inspect(&wait.container).await?;
        if !state.running {
            return Err(DenliteError::DependencyFailed(
                wait.service.clone(),
                "stopped before the start settle period completed".to_string(),
            ));
        }
        settled += 1;
        if settled >= SETTLE_POLLS {
            return Ok(());
        }
    }
}

/// Healthy for `SETTLE_POLLS` consecutive polls. Fatal when the
/// dependency declares no health probe or stops running; times out after
/// `MAX_UNHEALTHY_POLLS` consecutive non-healthy observations.
async fn wait_healthy(
    runtime: Arc<dyn ContainerRuntime>,
    wait: &DependencyWait,
) -> DenliteResult<()> {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let mut healthy_streak = 0;
    let mut unhealthy_polls = 0;
    loop {
        ticker.tick().await;
        let state = runtime.inspect(&wait.container).await?;
        if !state.running {
            return Err(DenliteError::DependencyFailed(
                wait.service.clone(),
                "stopped while waiting to become healthy".to_string(),
            ));
        }
        match state.health {
            None => {
                return Err(DenliteError::DependencyFailed(
                    wait.service.clone(),
                    "condition requires a health probe but none is configured".to_string(),
                ));
            }
            Some(HealthStatus::Healthy) => {
                healthy_streak += 1;
                unhealthy_polls = 0;
                if healthy_streak >= SETTLE_POLLS {
                    return Ok(());
                }
            }
            Some(_) => {
                healthy_streak = 0;
                unhealthy_polls += 1;
                if unhealthy_polls > MAX_UNHEALTHY_POLLS {
                    return Err(DenliteError::DependencyFailed(
                        wait.service.clone(),
                        format!("not healthy after {MAX_UNHEALTHY_POLLS} polls"),
                    ));
                }
            }
        }
    }
}

/// Exit code zero. A still-running dependency blocks on the runtime's
/// exit-wait primitive instead of busy-polling; there is no timeout.
async fn wait_completed(
    runtime: Arc<dyn ContainerRuntime>,
    wait: &DependencyWait,
) -> DenliteResult<()> {
    let state = runtime.inspect(&wait.container).await?;
    let exit_code = if state.running {
        runtime.wait_next_exit(&wait.container).await?
    } else {
        state.exit_code.ok_or_else(|| {
            DenliteError::DependencyFailed(
                wait.service.clone(),
                "stopped but reported no exit code".to_string(),
            )
        })?
    };

    if exit_code == 0 {
        Ok(())
    } else {
        Err(DenliteError::DependencyFailed(
            wait.service.clone(),
            format!("exited with code {exit_code}"),
        ))
    }
}
