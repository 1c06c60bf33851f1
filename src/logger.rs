//! The logger handle applications hold.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::UnixStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{self, Barriers, Client, ClientCommand, Endpoint, LocalOwner, Server};
use crate::notify::NotificationSink;
use crate::queue::WriteQueue;
use crate::record::{CallSite, Formatter};
use crate::rotation::RotationStrategy;
use crate::writer::FileWriter;
use crate::{Error, Level, LogConfig, LogRecord, Result};

/// A buffered logger shared by every process writing to the same file.
///
/// The first logger opened for a file becomes its owner and performs all
/// writes; loggers opened later, in this or any other process, forward their
/// records to it. Cloning is cheap and clones share one connection.
///
/// Call [`close`](Self::close) before exiting. An owner dropped without
/// closing still stops its channel, but records in flight may be lost.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    formatter: Arc<Formatter>,
    producer: mpsc::Sender<ClientCommand>,
    owner: Option<OwnerState>,
    tasks: tokio::sync::Mutex<Option<Tasks>>,
}

struct OwnerState {
    queue: WriteQueue,
    barriers: Arc<Barriers>,
    next_barrier: AtomicU64,
    socket: PathBuf,
}

struct Tasks {
    client: JoinHandle<()>,
    server: Option<Server>,
    queue: Option<JoinHandle<()>>,
}

impl Logger {
    /// Open a logger for `path` with default settings.
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        Self::from_config(LogConfig::new(path)).await
    }

    /// Open a logger from a configuration, rotating by archive.
    pub async fn from_config(config: LogConfig) -> Result<Self> {
        Self::open(config, None).await
    }

    /// Open a logger; with a sink, rotated files are exported through it.
    pub(crate) async fn open(
        config: LogConfig,
        sink: Option<Arc<dyn NotificationSink>>,
    ) -> Result<Self> {
        config.validate()?;
        let formatter = Arc::new(Formatter::new(&config)?);
        let target = channel::canonical_target(&config.filename)?;
        let socket_dir = config.socket_dir();
        tokio::fs::create_dir_all(&socket_dir).await?;
        let socket = channel::socket_path(&socket_dir, &target);

        let (producer, receiver) = mpsc::channel(config.channel_capacity);

        let (owner, tasks) = match channel::elect(&socket).await? {
            Endpoint::Owner(listener) => {
                let strategy = RotationStrategy::new(sink, config.mail.clone());
                let writer = FileWriter::new(target.clone(), config.file_size, strategy);
                let (queue, queue_task) =
                    WriteQueue::spawn(writer, Arc::clone(&formatter), config.flush_policy());
                let barriers = Arc::new(Barriers::default());
                let server = Server::spawn(listener, queue.clone(), Arc::clone(&barriers));

                let stream = match UnixStream::connect(&socket).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        server.shutdown().await;
                        queue.close().await;
                        let _ = std::fs::remove_file(&socket);
                        return Err(Error::Transport(format!(
                            "owner could not connect to {}: {}",
                            socket.display(),
                            e
                        )));
                    }
                };
                let local = LocalOwner {
                    queue: queue.clone(),
                    barriers: Arc::clone(&barriers),
                };
                let client = Client::spawn(stream, receiver, Some(local));
                info!(file = %target.display(), socket = %socket.display(), "opened log as owner");

                let owner = OwnerState {
                    queue,
                    barriers,
                    next_barrier: AtomicU64::new(0),
                    socket,
                };
                let tasks = Tasks {
                    client,
                    server: Some(server),
                    queue: Some(queue_task),
                };
                (Some(owner), tasks)
            }
            Endpoint::Follower(stream) => {
                let client = Client::spawn(stream, receiver, None);
                info!(file = %target.display(), socket = %socket.display(), "opened log as follower");
                let tasks = Tasks {
                    client,
                    server: None,
                    queue: None,
                };
                (None, tasks)
            }
        };

        Ok(Self {
            inner: Arc::new(Inner {
                path: target,
                formatter,
                producer,
                owner,
                tasks: tokio::sync::Mutex::new(Some(tasks)),
            }),
        })
    }

    /// The canonical path of the log file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Whether this logger performs the writes for its file.
    pub fn is_owner(&self) -> bool {
        self.inner.owner.is_some()
    }

    /// Whether records at `level` pass the configured threshold.
    pub fn enabled(&self, level: Level) -> bool {
        self.inner.formatter.enabled(level)
    }

    /// Log `message` at `level`.
    #[track_caller]
    pub fn log_at(&self, level: Level, message: impl fmt::Display) {
        self.emit(level, &message, Some(CallSite::caller()));
    }

    #[track_caller]
    pub fn log(&self, message: impl fmt::Display) {
        self.emit(Level::Log, &message, Some(CallSite::caller()));
    }

    #[track_caller]
    pub fn debug(&self, message: impl fmt::Display) {
        self.emit(Level::Debug, &message, Some(CallSite::caller()));
    }

    #[track_caller]
    pub fn info(&self, message: impl fmt::Display) {
        self.emit(Level::Info, &message, Some(CallSite::caller()));
    }

    #[track_caller]
    pub fn warn(&self, message: impl fmt::Display) {
        self.emit(Level::Warn, &message, Some(CallSite::caller()));
    }

    #[track_caller]
    pub fn error(&self, message: impl fmt::Display) {
        self.emit(Level::Error, &message, Some(CallSite::caller()));
    }

    /// Format and submit a record with an explicit call site.
    pub fn emit(&self, level: Level, message: &dyn fmt::Display, call_site: Option<CallSite>) {
        let Some(record) = self.inner.formatter.format(level, message, call_site) else {
            return;
        };
        self.inner.formatter.echo(&record);
        self.push(record);
    }

    /// Use `call_site` in place of the captured location for the next record
    /// that passes the level threshold. Only visible in trace mode.
    pub fn override_call_site(&self, call_site: impl Into<String>) {
        self.inner.formatter.override_call_site(call_site);
    }

    /// Submit an already formatted record.
    ///
    /// Never blocks. When the channel is full the record is handed to a
    /// background task, so it may land after records submitted later; the
    /// timestamp sort at flush time restores the order within a flush.
    pub fn push(&self, record: LogRecord) {
        let command = match self.inner.producer.try_send(ClientCommand::Record(record)) {
            Ok(()) => return,
            Err(TrySendError::Full(command)) => command,
            Err(TrySendError::Closed(ClientCommand::Record(record))) => {
                channel::fallback(&record);
                return;
            }
            Err(TrySendError::Closed(_)) => return,
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let producer = self.inner.producer.clone();
                runtime.spawn(async move {
                    if let Err(mpsc::error::SendError(ClientCommand::Record(record))) =
                        producer.send(command).await
                    {
                        channel::fallback(&record);
                    }
                });
            }
            Err(_) => {
                if let ClientCommand::Record(record) = command {
                    channel::fallback(&record);
                }
            }
        }
    }

    /// Write everything this logger has submitted so far.
    ///
    /// An owner returns once the file write finished. A follower returns once
    /// its records were handed to the owner, which writes them on its own
    /// schedule.
    pub async fn flush(&self) {
        match &self.inner.owner {
            Some(owner) => {
                self.barrier(owner).await;
                owner.queue.flush().await;
            }
            None => {
                let (done, wait) = oneshot::channel();
                if self.inner.producer.send(ClientCommand::Flush(done)).await.is_ok() {
                    let _ = wait.await;
                }
            }
        }
    }

    /// Flush and release the file.
    ///
    /// An owner first waits for its own records and, for a short grace
    /// period, for records followers already sent, then writes them all and
    /// removes the channel socket. Records submitted after close go to
    /// standard error. Calling close again does nothing.
    pub async fn close(&self) {
        let mut guard = self.inner.tasks.lock().await;
        let Some(tasks) = guard.take() else {
            return;
        };

        if let Some(owner) = &self.inner.owner {
            self.barrier(owner).await;
        }

        let _ = self.inner.producer.send(ClientCommand::Shutdown).await;
        if let Err(e) = tasks.client.await {
            warn!(error = %e, "channel client task failed");
        }

        if let Some(server) = tasks.server {
            server.shutdown().await;
        }

        if let Some(owner) = &self.inner.owner {
            owner.queue.close().await;
            if let Some(queue) = tasks.queue
                && let Err(e) = queue.await
            {
                warn!(error = %e, "write queue task failed");
            }
            remove_socket(&owner.socket);
        }

        info!(file = %self.inner.path.display(), "log closed");
    }

    /// Round trip through the owner's own connection, proving every record
    /// sent before it reached the buffer.
    async fn barrier(&self, owner: &OwnerState) {
        let id = owner.next_barrier.fetch_add(1, Ordering::Relaxed);
        let (done, wait) = oneshot::channel();
        owner.barriers.lock().insert(id, done);

        if self.inner.producer.send(ClientCommand::Barrier(id)).await.is_err() {
            owner.barriers.lock().remove(&id);
            return;
        }
        let _ = wait.await;
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("path", &self.inner.path)
            .field("owner", &self.is_owner())
            .finish_non_exhaustive()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let Some(tasks) = self.tasks.get_mut().take() else {
            return;
        };
        if let Some(server) = tasks.server {
            warn!(file = %self.path.display(), "log dropped without close");
            server.signal_shutdown();
        }
        if let Some(owner) = &self.owner {
            remove_socket(&owner.socket);
        }
    }
}

fn remove_socket(socket: &Path) {
    match std::fs::remove_file(socket) {
        Ok(()) => debug!(socket = %socket.display(), "channel socket removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(socket = %socket.display(), error = %e, "failed to remove channel socket"),
    }
}
