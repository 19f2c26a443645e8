//! The client façade and its supervisor.
//!
//! [`FileSystemClient`] multiplexes request/response commands and unsolicited
//! update events over one ordered text channel. There are no request
//! identifiers on the wire; correlation is strictly FIFO, so everything that
//! writes a command goes through a single serialized send path, and one
//! reader task per connection routes every inbound frame.
//!
//! The connection lifecycle (backoff, retry timers, re-establishment of open
//! handles) is decided by the pure state machine in `worksync-core`; this
//! module interprets the [`Action`]s it emits against the transport, the
//! pending-command FIFO and the handle registry.

use crate::bus::{StateBus, StateSubscription};
use crate::pending::{CommandKind, PendingCommands};
use crate::stream::{EventSink, FileStream};
use crate::transport::{Transport, WsTransport};
use crate::ClientError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use worksync_core::{Action, BackoffPolicy, ConnectionState, Input, OpenFileState, Phase};
use worksync_types::{Command, Handle, ServerEvent};

/// Configuration for [`FileSystemClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The server endpoint, e.g. `ws://localhost:8080/ws`.
    pub endpoint_url: String,
    /// Reconnect backoff schedule.
    pub backoff: BackoffPolicy,
}

impl ClientConfig {
    /// Create a configuration with the default backoff schedule.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            backoff: BackoffPolicy::default(),
        }
    }

    /// Set the delay before the first reconnection attempt.
    pub fn with_initial_backoff(mut self, initial: Duration) -> Self {
        self.backoff.initial = initial;
        self
    }

    /// Set the upper bound on any reconnection delay.
    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.backoff.max = max;
        self
    }

    /// Set the backoff growth factor.
    pub fn with_backoff_multiplier(mut self, multiplier: u32) -> Self {
        self.backoff.multiplier = multiplier;
        self
    }
}

/// Where a file is in its initial opening phase.
#[derive(Debug, Clone)]
enum OpenPhase {
    Pending,
    Opened,
    Failed(String),
}

struct FileEntry {
    state: OpenFileState,
    sink: EventSink,
    /// Flipped to `Opened` the moment the first `file_opened` response is
    /// dispatched, so a write issued right after the first stream event
    /// keeps its place in the send order.
    opened: Arc<watch::Sender<OpenPhase>>,
}

struct Inner {
    phase: Phase,
    pending: PendingCommands,
    files: HashMap<Handle, FileEntry>,
    next_handle: u64,
    /// Identifies the latest connect attempt; an attempt whose sequence
    /// number no longer matches reports into the void.
    attempt_seq: u64,
    /// Identifies the live connection; readers of replaced connections and
    /// their frames are ignored.
    epoch: u64,
    connect_waiters: Vec<oneshot::Sender<Result<(), ClientError>>>,
    retry_timer: Option<JoinHandle<()>>,
}

struct Shared<T: Transport> {
    config: ClientConfig,
    transport: Arc<T>,
    inner: Mutex<Inner>,
    /// Serializes command frames so wire order equals FIFO order.
    send_lock: tokio::sync::Mutex<()>,
    bus: Arc<StateBus>,
}

impl<T: Transport> Shared<T> {
    fn state(&self) -> ConnectionState {
        self.inner.lock().unwrap().phase.state()
    }

    fn has_open_files(&self) -> bool {
        !self.inner.lock().unwrap().files.is_empty()
    }

    /// Route one inbound frame: terminal events answer the FIFO head, and
    /// handle-bearing events reach the file's stream after normalization.
    fn dispatch_frame(&self, epoch: u64, frame: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.epoch != epoch {
            debug!("dropping frame from a replaced connection");
            return;
        }
        let event = match ServerEvent::from_text(frame) {
            Ok(event) => event,
            Err(error) => {
                warn!(%error, "undecodable frame; failing the head command");
                inner
                    .pending
                    .fail_head(ClientError::Protocol(error.to_string()));
                return;
            }
        };
        if event.is_terminal() {
            inner.pending.resolve(event.clone());
        }
        if let Some(handle) = event.handle() {
            match inner.files.get_mut(&handle) {
                Some(entry) => {
                    if matches!(event, ServerEvent::FileOpened { .. }) {
                        let _ = entry.opened.send(OpenPhase::Opened);
                    }
                    if let Some(file_event) = entry.state.normalize(&event) {
                        let _ = entry.sink.send(Ok(file_event));
                    }
                }
                None => debug!(%handle, "event for unknown handle; dropping"),
            }
        }
    }
}

/// Await a usable connection, dialing if nothing is in flight.
///
/// Concurrent callers share a single attempt: each parks a waiter that the
/// attempt resolves, so no caller ever starts a second dial.
async fn ensure_connected<T: Transport>(shared: &Arc<Shared<T>>) -> Result<(), ClientError> {
    let (rx, needs_request) = {
        let mut inner = shared.inner.lock().unwrap();
        let state = inner.phase.state();
        if state == ConnectionState::Connected {
            return Ok(());
        }
        let (tx, rx) = oneshot::channel();
        inner.connect_waiters.push(tx);
        (
            rx,
            matches!(
                state,
                ConnectionState::Disconnected | ConnectionState::ReconnectWait
            ),
        )
    };
    if needs_request {
        apply(shared, Input::ConnectRequested);
    }
    match rx.await {
        Ok(result) => result,
        Err(_) => Err(ClientError::ConnectionClosed("client shut down".into())),
    }
}

async fn submit<T: Transport>(
    shared: &Arc<Shared<T>>,
    command: Command,
) -> Result<ServerEvent, ClientError> {
    ensure_connected(shared).await?;
    submit_connected(shared, command).await
}

/// Enqueue a command and send its frame, preserving FIFO order.
async fn submit_connected<T: Transport>(
    shared: &Arc<Shared<T>>,
    command: Command,
) -> Result<ServerEvent, ClientError> {
    let frame = command
        .to_text()
        .map_err(|e| ClientError::Protocol(e.to_string()))?;
    let kind = CommandKind::of(&command);

    let send_guard = shared.send_lock.lock().await;
    let (rx, epoch) = {
        let mut inner = shared.inner.lock().unwrap();
        if inner.phase.state() != ConnectionState::Connected {
            return Err(ClientError::ConnectionClosed(
                "connection lost before send".into(),
            ));
        }
        (inner.pending.push(kind), inner.epoch)
    };
    if let Err(error) = shared.transport.send(frame).await {
        // The loss transition drains the queue, which rejects the entry
        // pushed above.
        let open_files = shared.has_open_files();
        apply_filtered(
            shared,
            Input::ConnectionLost {
                reason: error.to_string(),
                open_files,
            },
            None,
            Some(epoch),
        );
    }
    drop(send_guard);

    match rx.await {
        Ok(result) => result,
        Err(_) => Err(ClientError::ConnectionClosed("client shut down".into())),
    }
}

fn apply<T: Transport>(shared: &Arc<Shared<T>>, input: Input) -> Vec<Action> {
    apply_filtered(shared, input, None, None)
}

/// Feed an input into the state machine and interpret the actions.
///
/// `require_attempt` / `require_epoch` discard inputs from connect attempts
/// or readers that have since been replaced. Returns the actions that were
/// produced (empty when the input was discarded or absorbed).
fn apply_filtered<T: Transport>(
    shared: &Arc<Shared<T>>,
    input: Input,
    require_attempt: Option<u64>,
    require_epoch: Option<u64>,
) -> Vec<Action> {
    let is_disconnect = matches!(input, Input::DisconnectRequested);
    let connect_error = match &input {
        Input::ConnectFailed { error, .. } => Some(ClientError::ConnectFailed(error.clone())),
        Input::DisconnectRequested => {
            Some(ClientError::ConnectionClosed("client disconnected".into()))
        }
        _ => None,
    };

    let mut changed_to = None;
    let actions = {
        let mut inner = shared.inner.lock().unwrap();
        if require_attempt.is_some_and(|seq| seq != inner.attempt_seq) {
            return Vec::new();
        }
        if require_epoch.is_some_and(|epoch| epoch != inner.epoch) {
            return Vec::new();
        }

        let old_state = inner.phase.state();
        let phase = std::mem::take(&mut inner.phase);
        let (next, actions) = phase.on_input(input, &shared.config.backoff);
        inner.phase = next;
        let new_state = inner.phase.state();

        for action in &actions {
            match action {
                Action::CancelRetry => {
                    if let Some(timer) = inner.retry_timer.take() {
                        timer.abort();
                    }
                }
                Action::FailPending { reason } => inner.pending.drain(reason),
                Action::StartConnect => {
                    inner.attempt_seq += 1;
                    let seq = inner.attempt_seq;
                    let shared = Arc::clone(shared);
                    tokio::spawn(async move { run_connect(shared, seq).await });
                }
                Action::ScheduleRetry { delay } => {
                    let delay = *delay;
                    let shared = Arc::clone(shared);
                    inner.retry_timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        apply(&shared, Input::RetryTimerFired);
                    }));
                }
                // Handled after the transition bookkeeping below.
                Action::Reestablish => {}
                // The caller owns the socket teardown.
                Action::CloseChannel => {}
            }
        }

        if is_disconnect {
            inner.attempt_seq += 1;
            inner.epoch += 1;
        }

        if new_state == ConnectionState::Connected && old_state != ConnectionState::Connected {
            inner.epoch += 1;
            let epoch = inner.epoch;
            {
                let shared = Arc::clone(shared);
                tokio::spawn(async move { run_reader(shared, epoch).await });
            }

            for waiter in inner.connect_waiters.drain(..) {
                let _ = waiter.send(Ok(()));
            }
            if actions.iter().any(|a| matches!(a, Action::Reestablish)) {
                let reopen: Vec<(Handle, String)> = inner
                    .files
                    .iter()
                    .filter(|(_, entry)| entry.state.has_been_opened())
                    .map(|(handle, entry)| (*handle, entry.state.path().to_string()))
                    .collect();
                for (handle, path) in reopen {
                    let shared = Arc::clone(shared);
                    tokio::spawn(async move { reestablish_file(shared, handle, path).await });
                }
            }
        } else if old_state == ConnectionState::Connecting
            && new_state != ConnectionState::Connecting
        {
            let error =
                connect_error.unwrap_or_else(|| ClientError::ConnectFailed("attempt abandoned".into()));
            for waiter in inner.connect_waiters.drain(..) {
                let _ = waiter.send(Err(error.clone()));
            }
        }

        if old_state != new_state {
            changed_to = Some(new_state);
        }
        actions
    };

    if let Some(state) = changed_to {
        shared.bus.emit(state);
    }
    actions
}

/// Run one connect attempt and feed the outcome back into the machine.
async fn run_connect<T: Transport>(shared: Arc<Shared<T>>, seq: u64) {
    match shared.transport.connect(&shared.config.endpoint_url).await {
        Ok(()) => {
            let actions = apply_filtered(&shared, Input::ConnectSucceeded, Some(seq), None);
            if actions.is_empty() {
                debug!("discarding stale connection attempt");
            } else {
                info!(url = %shared.config.endpoint_url, "connected");
            }
        }
        Err(error) => {
            let open_files = shared.has_open_files();
            apply_filtered(
                &shared,
                Input::ConnectFailed {
                    error: error.to_string(),
                    open_files,
                },
                Some(seq),
                None,
            );
        }
    }
}

/// Read frames for the connection identified by `epoch` until it dies.
async fn run_reader<T: Transport>(shared: Arc<Shared<T>>, epoch: u64) {
    loop {
        match shared.transport.recv().await {
            Ok(frame) => shared.dispatch_frame(epoch, &frame),
            Err(error) => {
                let open_files = shared.has_open_files();
                let applied = apply_filtered(
                    &shared,
                    Input::ConnectionLost {
                        reason: error.to_string(),
                        open_files,
                    },
                    None,
                    Some(epoch),
                );
                if !applied.is_empty() {
                    info!(%error, "connection lost");
                }
                return;
            }
        }
    }
}

/// Reissue `open_file` for a handle that had already finished opening.
async fn reestablish_file<T: Transport>(shared: Arc<Shared<T>>, handle: Handle, path: String) {
    match submit_connected(
        &shared,
        Command::OpenFile {
            path: path.clone(),
            handle,
        },
    )
    .await
    {
        Ok(_) => debug!(%handle, path, "re-established file"),
        Err(error) => warn!(%handle, path, %error, "failed to re-establish file"),
    }
}

/// Drive the initial `open_file` exchange for a freshly allocated handle.
async fn open_task<T: Transport>(
    shared: Arc<Shared<T>>,
    handle: Handle,
    path: String,
    phase_tx: Arc<watch::Sender<OpenPhase>>,
) {
    match submit(
        &shared,
        Command::OpenFile {
            path: path.clone(),
            handle,
        },
    )
    .await
    {
        Ok(_) => {
            let _ = phase_tx.send(OpenPhase::Opened);
        }
        Err(error) => {
            debug!(%handle, path, %error, "initial open failed");
            let _ = phase_tx.send(OpenPhase::Failed(error.to_string()));
            // Surface the failure to whoever iterates the stream, then
            // forget the handle so it is not re-established later.
            let entry = shared.inner.lock().unwrap().files.remove(&handle);
            if let Some(entry) = entry {
                let _ = entry.sink.send(Err(error));
            }
        }
    }
}

/// Send `close_file` once the open phase settled, ignoring any failure.
async fn close_task<T: Transport>(
    shared: Arc<Shared<T>>,
    handle: Handle,
    mut open_rx: watch::Receiver<OpenPhase>,
) {
    loop {
        let phase = open_rx.borrow_and_update().clone();
        match phase {
            OpenPhase::Opened => break,
            OpenPhase::Failed(_) => return,
            OpenPhase::Pending => {
                if open_rx.changed().await.is_err() {
                    return;
                }
            }
        }
    }
    // The server drops all handles with the connection, so there is no
    // point dialing just to close one.
    if shared.state() != ConnectionState::Connected {
        return;
    }
    match submit_connected(&shared, Command::CloseFile { handle }).await {
        Ok(_) => debug!(%handle, "closed file"),
        Err(error) => debug!(%handle, %error, "close_file failed; ignoring"),
    }
}

/// Client engine for the worksync file synchronization protocol.
///
/// The client owns the connection lifecycle: it dials lazily on the first
/// operation that needs the channel, reports health through
/// [`on_state_change`](Self::on_state_change), and after a connection drop
/// silently re-establishes every open file on the server, suppressing
/// "opened again" noise when nothing changed.
///
/// All operations require a tokio runtime.
pub struct FileSystemClient<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl FileSystemClient<WsTransport> {
    /// Create a client that talks WebSocket to `config.endpoint_url`.
    pub fn websocket(config: ClientConfig) -> Self {
        Self::new(config, WsTransport::new())
    }
}

impl<T: Transport> FileSystemClient<T> {
    /// Create a client over the given transport. Nothing is dialed until an
    /// operation needs the channel or [`connect_now`](Self::connect_now) is
    /// called.
    pub fn new(config: ClientConfig, transport: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                transport: Arc::new(transport),
                inner: Mutex::new(Inner {
                    phase: Phase::new(),
                    pending: PendingCommands::new(),
                    files: HashMap::new(),
                    next_handle: 0,
                    attempt_seq: 0,
                    epoch: 0,
                    connect_waiters: Vec::new(),
                    retry_timer: None,
                }),
                send_lock: tokio::sync::Mutex::new(()),
                bus: Arc::new(StateBus::new()),
            }),
        }
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Register a connection-state listener.
    ///
    /// The listener is invoked immediately with the current state, then on
    /// every transition. Cancel via the returned subscription.
    pub fn on_state_change(
        &self,
        listener: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> StateSubscription {
        let current = self.state();
        self.shared.bus.subscribe(current, Arc::new(listener))
    }

    /// Connect immediately, bypassing any pending backoff timer.
    ///
    /// Resolves once connected; fails if this attempt fails.
    pub async fn connect_now(&self) -> Result<(), ClientError> {
        ensure_connected(&self.shared).await
    }

    /// Tear down: cancel timers, reject pending commands, close the channel.
    pub async fn disconnect(&self) {
        let actions = apply(&self.shared, Input::DisconnectRequested);
        if actions.iter().any(|a| matches!(a, Action::CloseChannel)) {
            let _ = self.shared.transport.close().await;
            info!("disconnected");
        }
    }

    /// Open a path and return its handle object. Non-blocking: the command
    /// is sent in the background (connecting first if necessary), and the
    /// first event on the file's stream is the server's `file_opened`
    /// response.
    pub fn open_file(&self, path: impl Into<String>) -> RemoteFile<T> {
        let path = path.into();
        let (sink, receiver) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(OpenPhase::Pending);
        let phase_tx = Arc::new(phase_tx);

        let handle = {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.next_handle += 1;
            let handle = Handle::new(inner.next_handle);
            inner.files.insert(
                handle,
                FileEntry {
                    state: OpenFileState::new(path.clone()),
                    sink,
                    opened: Arc::clone(&phase_tx),
                },
            );
            handle
        };

        {
            let shared = Arc::clone(&self.shared);
            let path = path.clone();
            tokio::spawn(async move { open_task(shared, handle, path, phase_tx).await });
        }

        RemoteFile {
            handle,
            path,
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
            open_rx: phase_rx,
            stream: Mutex::new(Some(FileStream::new(receiver))),
        }
    }

    /// Commit all outstanding changes in the repository.
    pub async fn commit(&self, message: &str) -> Result<(), ClientError> {
        submit(
            &self.shared,
            Command::Commit {
                message: message.to_string(),
            },
        )
        .await
        .map(|_| ())
    }

    /// The underlying transport (test verification).
    pub fn transport(&self) -> &T {
        &self.shared.transport
    }
}

impl<T: Transport> Drop for FileSystemClient<T> {
    fn drop(&mut self) {
        // Stop timers and reject waiting callers. The socket itself is
        // closed in the background when a runtime is still around.
        let actions = apply(&self.shared, Input::DisconnectRequested);
        if actions.iter().any(|a| matches!(a, Action::CloseChannel)) {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let transport = Arc::clone(&self.shared.transport);
                runtime.spawn(async move {
                    let _ = transport.close().await;
                });
            }
        }
    }
}

/// One opened view of a path.
///
/// Created by [`FileSystemClient::open_file`]. The handle stays valid across
/// reconnects until [`close`](Self::close).
pub struct RemoteFile<T: Transport> {
    handle: Handle,
    path: String,
    shared: Arc<Shared<T>>,
    closed: AtomicBool,
    open_rx: watch::Receiver<OpenPhase>,
    stream: Mutex<Option<FileStream>>,
}

impl<T: Transport> RemoteFile<T> {
    /// The path this file was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The client-allocated handle for this file.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Take the event stream for this file.
    ///
    /// May be called at most once; a second call fails with
    /// [`ClientError::StreamConsumed`].
    pub fn events(&self) -> Result<FileStream, ClientError> {
        self.stream
            .lock()
            .unwrap()
            .take()
            .ok_or(ClientError::StreamConsumed)
    }

    /// Write new content through this handle.
    ///
    /// `last_content` is what this client last observed; the server merges
    /// concurrent edits and the returned string is the content actually
    /// stored. The same `file_written` event is also delivered on the
    /// file's stream.
    pub async fn write(&self, last_content: &str, new_content: &str) -> Result<String, ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::FileClosed);
        }
        self.await_opened().await?;
        let event = submit(
            &self.shared,
            Command::WriteFile {
                handle: self.handle,
                last_content: last_content.to_string(),
                new_content: new_content.to_string(),
            },
        )
        .await?;
        match event {
            ServerEvent::FileWritten { content, .. } => Ok(content),
            other => Err(ClientError::Protocol(format!(
                "unexpected response to write_file: {other:?}"
            ))),
        }
    }

    /// Close this file. Fire-and-forget and idempotent.
    ///
    /// The stream ends as soon as its buffer drains; the `close_file`
    /// command goes out once the file has finished opening, and any server
    /// error for it is ignored.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.inner.lock().unwrap().files.remove(&self.handle);
        let shared = Arc::clone(&self.shared);
        let handle = self.handle;
        let open_rx = self.open_rx.clone();
        tokio::spawn(async move { close_task(shared, handle, open_rx).await });
    }

    async fn await_opened(&self) -> Result<(), ClientError> {
        let mut rx = self.open_rx.clone();
        loop {
            let phase = rx.borrow_and_update().clone();
            match phase {
                OpenPhase::Opened => return Ok(()),
                OpenPhase::Failed(reason) => return Err(ClientError::ConnectionClosed(reason)),
                OpenPhase::Pending => {
                    if rx.changed().await.is_err() {
                        return Err(ClientError::FileClosed);
                    }
                }
            }
        }
    }
}
