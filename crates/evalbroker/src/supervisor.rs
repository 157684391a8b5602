//! Deadline enforcement for one in-flight unit.
//!
//! `Running` ends in one of three states:
//! - `Completed`: the unit returned before its deadline; the host is recycled.
//! - `CooperativelyStopped`: the deadline passed, the cancel token was set and
//!   the unit returned within the grace period.
//! - `ForciblyTerminated`: the grace period elapsed too, or the broker forced
//!   all stragglers down at shutdown.
//!
//! Any timed-out host is terminated, never recycled.

use std::time::Duration;

use tokio::time::{sleep, sleep_until, Instant};

use crate::cancel::CancelToken;
use crate::pool::{PooledHost, WorkerPool};
use crate::unit::{ExecutionUnit, Outcome};
use crate::Result;

enum Verdict {
    Completed(Result<Outcome>),
    CooperativelyStopped,
    ForciblyTerminated,
}

pub(crate) struct Supervision {
    pub timeout: Duration,
    pub grace: Duration,
}

pub(crate) async fn supervise(
    pool: &WorkerPool,
    mut host: PooledHost,
    unit: ExecutionUnit,
    supervision: Supervision,
    force: &CancelToken,
) -> Outcome {
    let task_id = unit.task_id;
    let cancel = unit.cancel.clone();
    let deadline = Instant::now() + supervision.timeout;

    let verdict = {
        let run = host.run(unit);
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => Verdict::Completed(result),
            _ = sleep_until(deadline) => {
                tracing::trace!("Task {} hit its deadline, cancelling", task_id);
                cancel.cancel();
                tokio::select! {
                    _ = &mut run => Verdict::CooperativelyStopped,
                    _ = sleep(supervision.grace) => Verdict::ForciblyTerminated,
                    _ = force.cancelled() => Verdict::ForciblyTerminated,
                }
            }
            _ = force.cancelled() => {
                cancel.cancel();
                Verdict::ForciblyTerminated
            }
        }
    };

    match verdict {
        Verdict::Completed(Ok(outcome)) => {
            tracing::trace!("Task {} completed on host {}", task_id, host.id());
            pool.release(host);
            outcome
        }
        Verdict::Completed(Err(err)) => {
            tracing::error!("Task {} lost its host: {}", task_id, err);
            pool.terminate(host);
            Outcome::Failed {
                message: err.to_string(),
            }
        }
        Verdict::CooperativelyStopped => {
            tracing::debug!("Task {} stopped cooperatively after timeout", task_id);
            pool.terminate(host);
            Outcome::TimedOut
        }
        Verdict::ForciblyTerminated => {
            tracing::warn!("Task {} forcibly terminated on host {}", task_id, host.id());
            pool.terminate(host);
            Outcome::TimedOut
        }
    }
}
