//! Background execution of long-running upgrade steps.
//!
//! A long-running step is acknowledged synchronously by moving it to `Running`, after which its
//! work runs on a background task that resolves the step to `Complete` or `Failed`. Once
//! dispatched a step can not be cancelled; callers may only observe it through the checklist.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::checklist::Checklist;
use crate::error::AppError;
use gpupgrade_core::UpgradeStep;

/// The runner of upgrade step work.
pub struct StepRunner {
    checklist: Arc<Checklist>,
    /// Handles of all background step tasks which have not yet been reaped.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StepRunner {
    /// Create a new instance.
    pub fn new(checklist: Arc<Checklist>) -> Self {
        Self { checklist, tasks: Mutex::new(vec![]) }
    }

    /// The checklist driven by this runner.
    pub fn checklist(&self) -> &Arc<Checklist> {
        &self.checklist
    }

    /// Mark the given step as running and spawn its work in the background.
    ///
    /// Returns as soon as the step is `Running`. Dispatching a step which is already running or
    /// finished fails with `InvalidTransition` without spawning anything.
    pub async fn dispatch<F>(&self, step: UpgradeStep, work: F) -> Result<(), AppError>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.checklist.mark_running(step)?;
        let checklist = self.checklist.clone();
        let handle = tokio::spawn(async move {
            let res = work.await;
            resolve(&checklist, step, res);
        });

        let mut tasks = self.tasks.lock().await;
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
        Ok(())
    }

    /// Run the given step's work inline, resolving the step before returning the work's output.
    pub async fn run_inline<T, F>(&self, step: UpgradeStep, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.checklist.mark_running(step)?;
        let res = work.await;
        let status = res.as_ref().map(|_| ()).map_err(|err| anyhow::anyhow!("{:#}", err));
        resolve(&self.checklist, step, status);
        res
    }

    /// Wait for every background step task dispatched so far to finish.
    pub async fn wait_idle(&self) {
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                tracing::error!(error = ?err, "error joining background step task");
            }
        }
    }
}

/// Resolve the given running step according to the result of its work.
fn resolve(checklist: &Checklist, step: UpgradeStep, res: Result<()>) {
    let transition = match res {
        Ok(()) => checklist.mark_complete(step),
        Err(err) => {
            tracing::error!(?step, error = ?err, "upgrade step failed");
            checklist.mark_failed(step)
        }
    };
    if let Err(err) = transition {
        tracing::error!(?step, error = %err, "error resolving upgrade step");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::bail;
    use tokio::sync::oneshot;

    use super::*;
    use gpupgrade_core::StepStatus;

    #[tokio::test]
    async fn dispatch_acknowledges_running_then_resolves_complete() -> Result<()> {
        let runner = StepRunner::new(Arc::new(Checklist::new()));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        runner
            .dispatch(UpgradeStep::SegInstall, async move {
                let _ = release_rx.await;
                Ok(())
            })
            .await?;
        let status = runner.checklist().status(UpgradeStep::SegInstall);
        assert!(status == StepStatus::Running, "expected RUNNING while work is in flight, got {}", status);

        let _ = release_tx.send(());
        runner.wait_idle().await;
        let status = runner.checklist().status(UpgradeStep::SegInstall);
        assert!(status == StepStatus::Complete, "expected COMPLETE after work finished, got {}", status);
        Ok(())
    }

    #[tokio::test]
    async fn failed_work_resolves_failed() -> Result<()> {
        let runner = StepRunner::new(Arc::new(Checklist::new()));
        runner.dispatch(UpgradeStep::MasterUpgrade, async { bail!("pg_upgrade exited with 1") }).await?;
        runner.wait_idle().await;
        let status = runner.checklist().status(UpgradeStep::MasterUpgrade);
        assert!(status == StepStatus::Failed, "expected FAILED, got {}", status);
        Ok(())
    }

    #[tokio::test]
    async fn redispatch_while_running_is_rejected_and_not_restarted() -> Result<()> {
        let runner = StepRunner::new(Arc::new(Checklist::new()));
        runner
            .dispatch(UpgradeStep::SegInstall, async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            })
            .await?;
        let res = runner.dispatch(UpgradeStep::SegInstall, async { bail!("must never run") }).await;
        assert!(matches!(res, Err(AppError::InvalidTransition { .. })), "expected InvalidTransition, got {:?}", res);

        runner.wait_idle().await;
        let status = runner.checklist().status(UpgradeStep::SegInstall);
        assert!(status == StepStatus::Complete, "expected the first dispatch to win, got {}", status);
        Ok(())
    }

    /// Dispatched work can not be aborted; dropping the runner leaves it running to completion.
    #[tokio::test]
    async fn dispatched_work_outlives_the_runner() -> Result<()> {
        let checklist = Arc::new(Checklist::new());
        let runner = StepRunner::new(checklist.clone());
        let (done_tx, done_rx) = oneshot::channel::<()>();
        runner
            .dispatch(UpgradeStep::PrepareInitCluster, async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let _ = done_tx.send(());
                Ok(())
            })
            .await?;
        drop(runner);

        done_rx.await?;
        for _ in 0..100 {
            if checklist.status(UpgradeStep::PrepareInitCluster) == StepStatus::Complete {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let status = checklist.status(UpgradeStep::PrepareInitCluster);
        assert!(status == StepStatus::Complete, "expected the work to resolve the step, got {}", status);
        Ok(())
    }

    #[tokio::test]
    async fn run_inline_resolves_before_returning() -> Result<()> {
        let runner = StepRunner::new(Arc::new(Checklist::new()));
        let val = runner.run_inline(UpgradeStep::CheckConfig, async { Ok(7) }).await?;
        assert_eq!(val, 7);
        let status = runner.checklist().status(UpgradeStep::CheckConfig);
        assert!(status == StepStatus::Complete, "expected COMPLETE, got {}", status);
        Ok(())
    }
}
