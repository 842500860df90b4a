//! # Task Pool
//!
//! Pool limitato di worker per optimize e repack.
//!
//! ## Responsabilità:
//! - `submit` non blocca mai: il task viene creato subito e acquisisce il
//!   permesso del semaforo al suo interno
//! - Al massimo `jobs` task lavorano contemporaneamente
//! - Un panic o un task cancellato diventa un `ReportStats` con errore,
//!   senza toccare i fratelli

use crate::error::OptimizeError;
use crate::handlers::TaskOutput;
use crate::report::ReportStats;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Bounded executor for handler tasks
#[derive(Clone)]
pub struct TaskPool {
    semaphore: Arc<Semaphore>,
    jobs: usize,
}

impl TaskPool {
    pub fn new(jobs: usize) -> Self {
        let jobs = jobs.max(1);
        debug!("🔧 Task pool with {} workers", jobs);
        Self {
            semaphore: Arc::new(Semaphore::new(jobs)),
            jobs,
        }
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Schedule `task`; the permit is taken inside the spawned task
    pub fn submit<F>(&self, label: String, bytes_in: u64, task: F) -> TaskHandle
    where
        F: Future<Output = TaskOutput> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let handle = tokio::spawn(async move {
            // A closed semaphore only happens at shutdown; run unthrottled then
            let _permit = semaphore.acquire_owned().await.ok();
            task.await
        });
        TaskHandle {
            label,
            bytes_in,
            handle,
        }
    }
}

/// A submitted task and what is needed to report it if it dies
pub struct TaskHandle {
    label: String,
    bytes_in: u64,
    handle: JoinHandle<TaskOutput>,
}

impl TaskHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wait for the task; a join failure becomes an error report
    pub async fn resolve(self) -> TaskOutput {
        match self.handle.await {
            Ok(output) => output,
            Err(e) => {
                error!("💥 Task for {} died: {}", self.label, e);
                TaskOutput {
                    report: ReportStats::error(self.label, self.bytes_in, OptimizeError::Task(e.to_string())),
                    path_info: None,
                    changed: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn output(name: &str) -> TaskOutput {
        TaskOutput {
            report: ReportStats::new(name, 1, 1),
            path_info: None,
            changed: false,
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = TaskPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                pool.submit(format!("t{}", i), 1, async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    output("t")
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.resolve().await.report.error.is_none());
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_panic_becomes_error_report() {
        let pool = TaskPool::new(1);
        let crash = true;
        let handle = pool.submit("boom.png".to_string(), 42, async move {
            if crash {
                panic!("optimizer crashed");
            }
            output("boom.png")
        });
        assert_eq!(handle.label(), "boom.png");
        let output = handle.resolve().await;
        assert!(matches!(output.report.error, Some(OptimizeError::Task(_))));
        assert_eq!(output.report.bytes_in, 42);
        assert!(output.path_info.is_none());
    }

    #[test]
    fn test_zero_jobs_still_runs() {
        assert_eq!(TaskPool::new(0).jobs(), 1);
    }
}
