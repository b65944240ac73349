//! Transfer progress notification.
//!
//! The transfer publishes its byte count into a `watch` channel and never waits
//! on the caller's callback; a separate task delivers the latest value to the
//! callback. Bursts of updates coalesce, so a slow callback sees fewer, newer
//! values instead of slowing the transfer down.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Called with `(bytes transferred so far, total bytes if known)`.
pub type ProgressCallback = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

type Progress = Option<(u64, Option<u64>)>;

/// Publishing side of a progress channel, handed to the transfer.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<Progress>>,
}

impl ProgressReporter {
    /// Starts a delivery task for `callback`.
    ///
    /// The task runs until every clone of the returned reporter is dropped or
    /// the task is finished, and always delivers the last
    /// reported value before it exits.
    pub(crate) fn spawn(callback: ProgressCallback) -> (Self, ProgressTask) {
        let (tx, mut rx) = watch::channel(None);
        let stop = CancellationToken::new();
        let stopped = stop.clone();

        let handle = tokio::spawn(async move {
            let mut delivered: Progress = None;
            loop {
                tokio::select! {
                    biased;
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = stopped.cancelled() => break,
                }
                delivered = deliver(&callback, *rx.borrow_and_update(), delivered);
            }
            deliver(&callback, *rx.borrow(), delivered);
        });

        (Self { tx: Arc::new(tx) }, ProgressTask { handle, stop })
    }

    /// Publishes the current byte count. Never blocks.
    pub fn report(&self, transferred: u64, total: Option<u64>) {
        self.tx.send_replace(Some((transferred, total)));
    }
}

/// Calls `callback` with `current` unless it was the last value delivered.
fn deliver(callback: &ProgressCallback, current: Progress, delivered: Progress) -> Progress {
    match current {
        Some((transferred, total)) if current != delivered => {
            callback(transferred, total);
            current
        }
        _ => delivered,
    }
}

/// Delivery side of a progress channel.
pub(crate) struct ProgressTask {
    handle: JoinHandle<()>,
    stop: CancellationToken,
}

impl ProgressTask {
    /// Stops the delivery task once the latest value has been delivered.
    ///
    /// Reporters still alive afterwards publish into a closed channel.
    pub(crate) async fn finish(self) {
        self.stop.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Progress callback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_final_value_is_delivered() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let (reporter, task) = ProgressReporter::spawn(Arc::new(move |done, total| {
            sink.lock().unwrap().push((done, total));
        }));

        for i in 1..=10 {
            reporter.report(i * 10, Some(100));
        }
        drop(reporter);
        task.finish().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.last(), Some(&(100, Some(100))));
        assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[tokio::test]
    async fn test_finish_with_live_reporter() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let (reporter, task) = ProgressReporter::spawn(Arc::new(move |done, total| {
            sink.lock().unwrap().push((done, total));
        }));

        reporter.report(5, None);
        task.finish().await;
        reporter.report(6, None);

        assert_eq!(*seen.lock().unwrap(), vec![(5, None)]);
    }

    #[tokio::test]
    async fn test_panicking_callback_is_contained() {
        let (reporter, task) = ProgressReporter::spawn(Arc::new(|_, _| panic!("callback bug")));
        reporter.report(1, None);
        drop(reporter);
        task.finish().await;
    }
}
