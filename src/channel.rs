//! Ownership channel.
//!
//! Every process logging to the same file derives the same socket path from
//! the file's canonical path. The first one to bind it owns the file; the rest
//! connect and stream their records to it. The owner also connects to its own
//! socket, so records take the same route regardless of role.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};
use twox_hash::XxHash64;

use crate::codec::{Packet, RecordCodec};
use crate::queue::WriteQueue;
use crate::{Error, LogRecord, Result};

/// How long a closing owner waits for followers to deliver what they sent.
pub const CLOSE_GRACE: Duration = Duration::from_millis(500);

const ELECTION_ATTEMPTS: usize = 3;

/// Pending barrier acknowledgements, keyed by barrier id.
pub(crate) type Barriers = Mutex<HashMap<u64, oneshot::Sender<()>>>;

/// Resolve `path` to the key every process agrees on.
///
/// Existing files are canonicalized; otherwise the parent directory is
/// canonicalized when it exists, and the path is made absolute as a last resort.
pub fn canonical_target(path: &Path) -> io::Result<PathBuf> {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return Ok(canonical);
    }
    let absolute = std::path::absolute(path)?;
    if let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name())
        && let Ok(parent) = std::fs::canonicalize(parent)
    {
        return Ok(parent.join(name));
    }
    Ok(absolute)
}

/// Socket path for the channel of `target`, a stable hash of the path.
pub fn socket_path(dir: &Path, target: &Path) -> PathBuf {
    let hash = XxHash64::oneshot(0, target.as_os_str().as_encoded_bytes());
    dir.join(format!("sharedlog-{:016x}.sock", hash))
}

/// Outcome of the bind race.
#[derive(Debug)]
pub(crate) enum Endpoint {
    Owner(UnixListener),
    Follower(UnixStream),
}

/// Bind the channel socket, or connect to whoever already did.
///
/// A socket file nobody accepts on is left over from an owner that exited; it
/// is removed and the bind retried.
pub(crate) async fn elect(socket: &Path) -> Result<Endpoint> {
    for _ in 0..ELECTION_ATTEMPTS {
        match UnixListener::bind(socket) {
            Ok(listener) => return Ok(Endpoint::Owner(listener)),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {}
            Err(e) => {
                return Err(Error::Transport(format!(
                    "failed to bind {}: {}",
                    socket.display(),
                    e
                )));
            }
        }

        match UnixStream::connect(socket).await {
            Ok(stream) => return Ok(Endpoint::Follower(stream)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                ) =>
            {
                warn!(socket = %socket.display(), "removing stale channel socket");
                match std::fs::remove_file(socket) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => {
                return Err(Error::Transport(format!(
                    "failed to connect to {}: {}",
                    socket.display(),
                    e
                )));
            }
        }
    }

    Err(Error::Transport(format!(
        "could not bind or connect to {}",
        socket.display()
    )))
}

/// The owner's accept loop.
#[derive(Debug)]
pub(crate) struct Server {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    barriers: Arc<Barriers>,
}

impl Server {
    pub(crate) fn spawn(listener: UnixListener, queue: WriteQueue, barriers: Arc<Barriers>) -> Self {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(accept_loop(
            listener,
            queue,
            Arc::clone(&barriers),
            shutdown_rx,
        ));
        Self {
            shutdown,
            handle,
            barriers,
        }
    }

    /// Stop accepting and give open connections [`CLOSE_GRACE`] to drain.
    pub(crate) async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
        // Nobody is left to acknowledge these.
        self.barriers.lock().clear();
    }

    /// Ask the loop to stop without waiting for it.
    pub(crate) fn signal_shutdown(self) {
        let _ = self.shutdown.send(());
        self.barriers.lock().clear();
    }
}

async fn accept_loop(
    listener: UnixListener,
    queue: WriteQueue,
    barriers: Arc<Barriers>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    debug!("channel connection accepted");
                    connections.spawn(handle_connection(
                        stream,
                        queue.clone(),
                        Arc::clone(&barriers),
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "failed to accept channel connection");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = &mut shutdown => break,
        }
    }

    drop(listener);
    let drained = tokio::time::timeout(CLOSE_GRACE, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            open = connections.len(),
            "closing channel with followers still connected"
        );
        connections.shutdown().await;
    }
}

/// Read frames from one connection until it closes.
///
/// Payloads that fail to decode are dropped and reported; a frame whose length
/// prefix is out of range ends the connection.
async fn handle_connection(stream: UnixStream, queue: WriteQueue, barriers: Arc<Barriers>) {
    let mut frames = FramedRead::new(stream, RecordCodec::new());

    while let Some(frame) = frames.next().await {
        let payload = match frame {
            Ok(payload) => payload,
            Err(e) => {
                queue.report(Error::Transport(format!(
                    "resetting channel connection: {}",
                    e
                )));
                return;
            }
        };

        match Packet::decode(&payload) {
            Ok(Packet::Record(record)) => queue.push(record),
            Ok(Packet::Barrier(id)) => {
                if let Some(done) = barriers.lock().remove(&id) {
                    let _ = done.send(());
                }
            }
            Err(e) => queue.report(e),
        }
    }
    debug!("channel connection closed");
}

/// Messages from the logger front end to its channel client.
#[derive(Debug)]
pub(crate) enum ClientCommand {
    Record(LogRecord),
    /// Ask the owner to acknowledge once everything sent so far was read.
    Barrier(u64),
    /// Push buffered frames onto the socket.
    Flush(oneshot::Sender<()>),
    /// Deliver what is queued, close the connection and stop.
    Shutdown,
}

/// What the owner's own client can reach without the socket.
#[derive(Debug, Clone)]
pub(crate) struct LocalOwner {
    pub(crate) queue: WriteQueue,
    pub(crate) barriers: Arc<Barriers>,
}

/// Streams records to the owner over one connection.
///
/// Records the socket cannot carry, either because they are too large to
/// frame or because the connection broke, are diverted rather than dropped:
/// the owner's own client buffers them directly, a follower writes them to
/// standard error.
pub(crate) struct Client {
    sink: Option<FramedWrite<UnixStream, RecordCodec>>,
    unflushed: Vec<LogRecord>,
    owner: Option<LocalOwner>,
}

impl Client {
    pub(crate) fn spawn(
        stream: UnixStream,
        receiver: mpsc::Receiver<ClientCommand>,
        owner: Option<LocalOwner>,
    ) -> JoinHandle<()> {
        let client = Self {
            sink: Some(FramedWrite::new(stream, RecordCodec::new())),
            unflushed: Vec::new(),
            owner,
        };
        tokio::spawn(client.run(receiver))
    }

    async fn run(mut self, mut receiver: mpsc::Receiver<ClientCommand>) {
        'outer: while let Some(command) = receiver.recv().await {
            let mut next = Some(command);
            // Batch whatever is already queued into one socket flush.
            while let Some(command) = next.take() {
                match command {
                    ClientCommand::Record(record) => self.send(record).await,
                    ClientCommand::Barrier(id) => self.send_barrier(id).await,
                    ClientCommand::Flush(done) => {
                        self.flush().await;
                        let _ = done.send(());
                    }
                    ClientCommand::Shutdown => break 'outer,
                }
                next = receiver.try_recv().ok();
            }
            self.flush().await;
        }

        receiver.close();
        while let Ok(command) = receiver.try_recv() {
            match command {
                ClientCommand::Record(record) => self.send(record).await,
                ClientCommand::Barrier(id) => self.resolve_barrier(id),
                ClientCommand::Flush(done) => {
                    let _ = done.send(());
                }
                ClientCommand::Shutdown => {}
            }
        }
        self.flush().await;
        if let Some(mut sink) = self.sink.take()
            && let Err(e) = sink.close().await
        {
            debug!(error = %e, "channel connection did not close cleanly");
        }
    }

    async fn send(&mut self, record: LogRecord) {
        let Some(sink) = self.sink.as_mut() else {
            self.divert(record);
            return;
        };
        self.unflushed.push(record.clone());
        match sink.feed(Packet::Record(record)).await {
            Ok(()) => {}
            // Encoding refused this record only; the connection is fine.
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!(error = %e, "record cannot be framed for the log owner");
                if let Some(record) = self.unflushed.pop() {
                    self.divert(record);
                }
            }
            Err(e) => self.fail(e),
        }
    }

    async fn send_barrier(&mut self, id: u64) {
        let Some(sink) = self.sink.as_mut() else {
            self.resolve_barrier(id);
            return;
        };
        if let Err(e) = sink.feed(Packet::Barrier(id)).await {
            self.fail(e);
            self.resolve_barrier(id);
        }
    }

    async fn flush(&mut self) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        match sink.flush().await {
            Ok(()) => self.unflushed.clear(),
            Err(e) => self.fail(e),
        }
    }

    fn fail(&mut self, err: io::Error) {
        warn!(error = %err, "lost connection to log owner");
        self.sink = None;
        for record in std::mem::take(&mut self.unflushed) {
            self.divert(record);
        }
        if let Some(owner) = &self.owner {
            for (_, done) in owner.barriers.lock().drain() {
                let _ = done.send(());
            }
        }
    }

    fn divert(&self, record: LogRecord) {
        match &self.owner {
            Some(owner) => owner.queue.push(record),
            None => fallback(&record),
        }
    }

    fn resolve_barrier(&self, id: u64) {
        if let Some(done) = self
            .owner
            .as_ref()
            .and_then(|owner| owner.barriers.lock().remove(&id))
        {
            let _ = done.send(());
        }
    }
}

/// Last resort for records that cannot reach the owner.
pub(crate) fn fallback(record: &LogRecord) {
    eprintln!("{}", record.line());
}
