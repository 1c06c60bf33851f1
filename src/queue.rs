//! Single-flight write queue and flush scheduling.
//!
//! One worker task per owning logger executes flush requests in arrival
//! order, so the timer, a crossed size threshold, an explicit flush and the
//! final flush on close never touch the file at the same time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, error};

use crate::accumulator::SharedBuffer;
use crate::config::FlushPolicy;
use crate::record::{Formatter, now_millis};
use crate::writer::FileWriter;
use crate::{Error, Level, LogRecord};

/// Flush passes on close. The second pass writes errors reported by the
/// first; anything a persistent failure reports after that is dropped.
const FINAL_FLUSH_PASSES: usize = 2;

enum FlushRequest {
    /// The buffered byte count reached the size threshold.
    Threshold,
    /// Flush now and acknowledge.
    Flush(oneshot::Sender<()>),
    /// Flush one last time, acknowledge and stop.
    Close(oneshot::Sender<()>),
}

/// Handle to the write queue of an owning logger.
#[derive(Debug, Clone)]
pub(crate) struct WriteQueue {
    sender: mpsc::UnboundedSender<FlushRequest>,
    buffer: Arc<SharedBuffer>,
    formatter: Arc<Formatter>,
    threshold_pending: Arc<AtomicBool>,
}

impl std::fmt::Debug for FlushRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FlushRequest::Threshold => "Threshold",
            FlushRequest::Flush(_) => "Flush",
            FlushRequest::Close(_) => "Close",
        })
    }
}

struct Worker {
    buffer: Arc<SharedBuffer>,
    writer: FileWriter,
    formatter: Arc<Formatter>,
    threshold_pending: Arc<AtomicBool>,
    // Weak, so dropping every queue handle still ends the worker.
    requests: mpsc::WeakUnboundedSender<FlushRequest>,
}

impl WriteQueue {
    /// Start the worker task for `writer` under the given flush policy.
    pub(crate) fn spawn(
        writer: FileWriter,
        formatter: Arc<Formatter>,
        policy: FlushPolicy,
    ) -> (Self, JoinHandle<()>) {
        let threshold = match policy {
            FlushPolicy::Size(size) => Some(size),
            FlushPolicy::Timer(_) => None,
        };
        let buffer = Arc::new(SharedBuffer::new(threshold));
        let threshold_pending = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = mpsc::unbounded_channel();

        let worker = Worker {
            buffer: Arc::clone(&buffer),
            writer,
            formatter: Arc::clone(&formatter),
            threshold_pending: Arc::clone(&threshold_pending),
            requests: sender.downgrade(),
        };
        let handle = tokio::spawn(worker.run(receiver, policy));

        (
            Self {
                sender,
                buffer,
                formatter,
                threshold_pending,
            },
            handle,
        )
    }

    /// Buffer a record, scheduling a flush if it crossed the size threshold.
    pub(crate) fn push(&self, record: LogRecord) {
        buffer_record(&self.buffer, &self.threshold_pending, &self.sender, record);
    }

    /// Log `err` as an ERROR record of this logger.
    pub(crate) fn report(&self, err: Error) {
        error!(error = %err, "log channel error");
        self.push(error_record(&self.formatter, &err));
    }

    /// Flush and wait for the write to finish.
    pub(crate) async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(FlushRequest::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Final flush; the worker stops afterwards. Later calls return immediately.
    pub(crate) async fn close(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(FlushRequest::Close(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

impl Worker {
    async fn run(self, mut receiver: mpsc::UnboundedReceiver<FlushRequest>, policy: FlushPolicy) {
        let mut timer = match policy {
            FlushPolicy::Timer(period) => {
                let mut timer = interval_at(Instant::now() + period, period);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Some(timer)
            }
            FlushPolicy::Size(_) => None,
        };

        loop {
            tokio::select! {
                request = receiver.recv() => match request {
                    Some(FlushRequest::Threshold) => {
                        self.threshold_pending.store(false, Ordering::Release);
                        self.flush().await;
                    }
                    Some(FlushRequest::Flush(done)) => {
                        self.flush().await;
                        let _ = done.send(());
                    }
                    Some(FlushRequest::Close(done)) => {
                        self.flush_remaining().await;
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.flush_remaining().await;
                        break;
                    }
                },
                _ = tick(&mut timer) => self.flush().await,
            }
        }

        receiver.close();
        // Unblock anyone who raced the close.
        while let Ok(request) = receiver.try_recv() {
            if let FlushRequest::Flush(done) | FlushRequest::Close(done) = request {
                let _ = done.send(());
            }
        }
        debug!(file = %self.writer.path().display(), "write queue stopped");
    }

    async fn flush(&self) {
        let records = self.buffer.drain();
        if records.is_empty() {
            return;
        }

        let count = records.len();
        match self.writer.write(&records, |e| self.report(e)).await {
            Ok(action) => {
                debug!(file = %self.writer.path().display(), records = count, ?action, "flushed")
            }
            Err(e) => self.report(e),
        }
    }

    /// Flush until the buffer is empty, at most [`FINAL_FLUSH_PASSES`] times.
    async fn flush_remaining(&self) {
        for _ in 0..FINAL_FLUSH_PASSES {
            if self.buffer.is_empty() {
                break;
            }
            self.flush().await;
        }
    }

    /// Route an error into this logger's own ERROR records.
    fn report(&self, err: Error) {
        error!(file = %self.writer.path().display(), error = %err, "log write failed");
        let record = error_record(&self.formatter, &err);
        match self.requests.upgrade() {
            Some(requests) => {
                buffer_record(&self.buffer, &self.threshold_pending, &requests, record)
            }
            None => {
                self.buffer.push(record);
            }
        }
    }
}

/// Buffer `record`, queueing one threshold flush per crossing.
fn buffer_record(
    buffer: &SharedBuffer,
    threshold_pending: &AtomicBool,
    requests: &mpsc::UnboundedSender<FlushRequest>,
    record: LogRecord,
) {
    if buffer.push(record) && !threshold_pending.swap(true, Ordering::AcqRel) {
        let _ = requests.send(FlushRequest::Threshold);
    }
}

fn error_record(formatter: &Formatter, err: &Error) -> LogRecord {
    let record = formatter.format_at(now_millis(), Level::Error, err, None);
    formatter.echo(&record);
    record
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
