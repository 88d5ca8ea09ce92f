//! Bounded batch execution of whole-frame pipelines.
//!
//! Every frame pipeline already fans out on the worker pool, so running
//! all files of a batch at once would only multiply memory usage. The
//! [`BatchProcessor`] caps the number of pipelines in flight with a counting
//! permit built on a bounded channel of tokens.

use std::any::Any;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::ProcessingError;
use crate::events::InterruptFlag;

/// Pipelines allowed in flight by default: a quarter of the cores, at least one.
pub fn default_permits() -> usize {
    (num_cpus::get() / 4).max(1)
}

/// Counting semaphore. A token is taken by [`Permits::acquire`] and handed
/// back when the returned guard is dropped.
#[derive(Debug)]
pub struct Permits {
    release: Sender<()>,
    tokens: Receiver<()>,
}

impl Permits {
    pub fn new(count: usize) -> Self {
        let count = count.max(1);
        let (release, tokens) = bounded(count);
        for _ in 0..count {
            // Capacity equals count
            let _ = release.try_send(());
        }
        Self { release, tokens }
    }

    /// Blocks until a permit is available.
    pub fn acquire(&self) -> PermitGuard<'_> {
        // Both channel ends are owned by `self`, recv cannot disconnect
        let _ = self.tokens.recv();
        PermitGuard { permits: self }
    }

    pub fn available(&self) -> usize {
        self.tokens.len()
    }
}

/// Holds one permit until dropped.
#[derive(Debug)]
pub struct PermitGuard<'a> {
    permits: &'a Permits,
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        let _ = self.permits.release.try_send(());
    }
}

pub struct BatchProcessor {
    permits: Permits,
    interrupt: InterruptFlag,
}

impl Default for BatchProcessor {
    fn default() -> Self {
        Self::new(default_permits())
    }
}

impl BatchProcessor {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Permits::new(permits),
            interrupt: InterruptFlag::new(),
        }
    }

    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Runs `job` on every item, at most `permits` at a time.
    ///
    /// Items start in order. A failing or panicking job only affects its own
    /// result; once the interrupt flag is raised, items that have not started
    /// yet report `ProcessingError::Interrupted`.
    ///
    /// # Returns
    /// One result per item, in input order.
    pub fn run<I, T, F>(&self, items: Vec<I>, job: F) -> Vec<Result<T, ProcessingError>>
    where
        I: Send,
        T: Send,
        F: Fn(usize, I) -> Result<T, ProcessingError> + Sync,
    {
        log::info!(
            "Running {} batch items with {} permits",
            items.len(),
            self.permits.available()
        );
        let job = &job;
        let interrupt = &self.interrupt;
        std::thread::scope(|scope| {
            let handles: Vec<_> = items
                .into_iter()
                .enumerate()
                .map(|(index, item)| {
                    let permit = self.permits.acquire();
                    scope.spawn(move || {
                        let _permit = permit;
                        interrupt.check()?;
                        job(index, item)
                    })
                })
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(index, handle)| {
                    handle.join().unwrap_or_else(|panic| {
                        let message = panic_message(panic.as_ref());
                        log::error!("Batch item {index} panicked: {message}");
                        Err(ProcessingError::failure("batch", message))
                    })
                })
                .collect()
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_default_permits_at_least_one() {
        assert!(default_permits() >= 1);
        assert_eq!(Permits::new(0).available(), 1);
    }

    #[test]
    fn test_guard_returns_permit() {
        let permits = Permits::new(2);
        {
            let _a = permits.acquire();
            let _b = permits.acquire();
            assert_eq!(permits.available(), 0);
        }
        assert_eq!(permits.available(), 2);
    }

    #[test]
    fn test_concurrency_is_bounded() {
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let batch = BatchProcessor::new(2);

        let results = batch.run((0..8).collect(), |index, item: usize| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(index * 10 + item)
        });

        assert!(peak.load(Ordering::SeqCst) <= 2);
        let values: Vec<usize> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 11, 22, 33, 44, 55, 66, 77]);
    }

    #[test]
    fn test_failures_are_isolated() {
        let batch = BatchProcessor::new(2);
        let results = batch.run(vec![0, 1, 2, 3], |_, item: i32| match item {
            1 => Err(ProcessingError::MissingInput("frame".into())),
            2 => panic!("corrupted frame"),
            n => Ok(n),
        });

        assert_eq!(results.len(), 4);
        assert_eq!(*results[0].as_ref().unwrap(), 0);
        assert!(matches!(results[1], Err(ProcessingError::MissingInput(_))));
        match &results[2] {
            Err(ProcessingError::Failure { stage, message }) => {
                assert_eq!(*stage, "batch");
                assert_eq!(message, "corrupted frame");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(*results[3].as_ref().unwrap(), 3);
    }

    #[test]
    fn test_interrupted_batch_skips_jobs() {
        let flag = InterruptFlag::new();
        flag.interrupt();
        let calls = AtomicUsize::new(0);
        let batch = BatchProcessor::new(1).with_interrupt(flag);
        let results = batch.run(vec![(); 3], |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(ProcessingError::Interrupted))));
    }
}
