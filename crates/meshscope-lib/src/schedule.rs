//! Periodic job execution
//!
//! Two policies are provided:
//! - [`run_stateless`] fires the job on every tick without waiting for the
//!   previous run, so runs may overlap.
//! - [`run_stateful`] runs the job to completion and then sleeps, so runs
//!   never overlap and the period is measured between runs.
//!
//! Both return when the cancellation token fires. Jobs report their own
//! failures; nothing is surfaced to the scheduler.

use std::future::Future;
use std::time::Duration;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Spawn `job` every `period`, the first time one period after start
pub async fn run_stateless<F, Fut>(cancel: CancellationToken, period: Duration, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                tokio::spawn(job());
            }
        }
    }
}

/// Run `job` immediately, then again `pause` after each completion
pub async fn run_stateful<F, Fut>(cancel: CancellationToken, pause: Duration, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        job().await;

        if cancel.is_cancelled() {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(pause) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Tracks how many job runs are active at once
    #[derive(Default)]
    struct Probe {
        runs: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl Probe {
        async fn run(&self, busy: Duration) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            sleep(busy).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_stateless_runs_overlap() {
        let probe = Arc::new(Probe::default());
        let cancel = CancellationToken::new();

        let task = {
            let probe = Arc::clone(&probe);
            let cancel = cancel.clone();
            tokio::spawn(run_stateless(cancel, Duration::from_millis(10), move || {
                let probe = Arc::clone(&probe);
                async move { probe.run(Duration::from_millis(60)).await }
            }))
        };

        sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        task.await.unwrap();

        assert!(probe.runs.load(Ordering::SeqCst) >= 3);
        assert!(probe.max_active.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_stateless_waits_one_period_before_first_run() {
        let probe = Arc::new(Probe::default());
        let cancel = CancellationToken::new();

        let task = {
            let probe = Arc::clone(&probe);
            tokio::spawn(run_stateless(cancel.clone(), Duration::from_secs(60), move || {
                let probe = Arc::clone(&probe);
                async move { probe.run(Duration::ZERO).await }
            }))
        };

        sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(probe.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stateful_runs_never_overlap() {
        let probe = Arc::new(Probe::default());
        let cancel = CancellationToken::new();

        let task = {
            let probe = Arc::clone(&probe);
            tokio::spawn(run_stateful(cancel.clone(), Duration::from_millis(5), move || {
                let probe = Arc::clone(&probe);
                async move { probe.run(Duration::from_millis(20)).await }
            }))
        };

        sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        task.await.unwrap();

        assert!(probe.runs.load(Ordering::SeqCst) >= 2);
        assert_eq!(probe.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stateful_runs_immediately_and_cancel_interrupts_sleep() {
        let probe = Arc::new(Probe::default());
        let cancel = CancellationToken::new();

        let task = {
            let probe = Arc::clone(&probe);
            tokio::spawn(run_stateful(cancel.clone(), Duration::from_secs(3600), move || {
                let probe = Arc::clone(&probe);
                async move { probe.run(Duration::ZERO).await }
            }))
        };

        sleep(Duration::from_millis(50)).await;
        assert_eq!(probe.runs.load(Ordering::SeqCst), 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
