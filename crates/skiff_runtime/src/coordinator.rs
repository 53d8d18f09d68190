//! Migration coordinator.
//!
//! Drives engine invocations and routes each outcome: completed runs end the
//! session, captured snapshots are resumed locally, exported, or handed to
//! the peer, and faults are fatal.

use crate::config::{Mode, RunConfig};
use crate::controller::BreakpointController;
use crate::keys::KeyAction;
use crate::session::{MigrationSession, MigrationState};
use async_trait::async_trait;
use skiff_core::{CoreError, CoreResult, Engine, Outcome, SessionId, Snapshot, Word};
use skiff_storage::SnapshotFile;
use skiff_transport::{
    ExecuteRequest, ExecuteResponse, ExecutorService, FinishRequest, FinishResponse, PeerClient,
    PeerServer,
};
use skiff_vm::Interpreter;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How long to wait for in-flight responses once the server is told to stop
const SERVER_DRAIN: Duration = Duration::from_secs(1);

/// How a coordinator run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    /// The computation finished here
    Completed(Vec<Word>),
    /// The peer reported completion
    Finished,
    /// A snapshot was written to this path
    Exported(PathBuf),
    /// The operator aborted
    Aborted,
}

impl Exit {
    /// Process exit code
    #[must_use]
    pub fn code(&self) -> i32 {
        0
    }
}

/// Message from background runs and request handlers to the remote loop
#[derive(Debug)]
enum RemoteEvent {
    Completed(Vec<Word>),
    Finished,
    Failed(CoreError),
}

/// Orchestrates runs, captures and hand-offs for one process
pub struct Coordinator {
    config: Arc<RunConfig>,
    engine: Arc<dyn Engine>,
    controller: BreakpointController,
    session: Mutex<MigrationSession>,
    client: Option<PeerClient>,
}

impl Coordinator {
    /// Build the engine, controller and peer client for `config`
    ///
    /// # Errors
    ///
    /// Returns error if the peer address cannot be used
    pub fn new(config: Arc<RunConfig>) -> CoreResult<Self> {
        let controller = BreakpointController::new(config.trigger);
        let engine = Interpreter::new(config.program.module(), controller.signal().clone())
            .with_config(config.engine);
        let client = config
            .peer
            .as_deref()
            .map(|peer| PeerClient::with_timeout(peer, config.transport_timeout))
            .transpose()?;
        let session = MigrationSession::new(config.mode, config.peer.clone());

        Ok(Self {
            config,
            engine: Arc::new(engine),
            controller,
            session: Mutex::new(session),
            client,
        })
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Breakpoint controller
    #[must_use]
    pub fn controller(&self) -> &BreakpointController {
        &self.controller
    }

    /// Current migration state
    #[must_use]
    pub fn state(&self) -> MigrationState {
        self.session().state()
    }

    /// Correlation id of the current session
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session().session_id()
    }

    fn session(&self) -> MutexGuard<'_, MigrationSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn client(&self) -> CoreResult<&PeerClient> {
        self.client
            .as_ref()
            .ok_or_else(|| CoreError::config("no peer address configured"))
    }

    /// Run in the configured mode until an exit condition
    ///
    /// # Errors
    ///
    /// Returns the first fatal error
    pub async fn run(self: Arc<Self>, keys: Option<mpsc::Receiver<KeyAction>>) -> CoreResult<Exit> {
        match self.config.mode {
            Mode::Local => self.run_local(keys).await,
            Mode::Remote => {
                let server = PeerServer::bind(&self.config.listen).await?;
                self.run_remote(server, keys).await
            }
        }
    }

    /// Snapshot to start from, if configured
    fn load_initial(&self) -> CoreResult<Option<Snapshot>> {
        let Some(path) = &self.config.from_snapshot else {
            return Ok(None);
        };
        let stored = SnapshotFile::new(path).read()?;
        stored.ensure_program(self.config.program.name())?;
        tracing::info!(
            path = %path.display(),
            frames = stored.snapshot.depth(),
            checksum = %stored.checksum,
            "resuming from stored snapshot"
        );
        Ok(Some(stored.snapshot).filter(Snapshot::is_valid))
    }

    /// Enter `Running` for a fresh call or `Resuming` for a snapshot
    fn enter_run(&self, resuming: bool) -> CoreResult<()> {
        let next = if resuming {
            MigrationState::Resuming
        } else {
            MigrationState::Running
        };
        self.session().transition(next)
    }

    /// Run one engine invocation on a blocking thread.
    ///
    /// A valid snapshot is resumed; otherwise the program's entry function is
    /// called with the configured arguments. The trigger policy applies for
    /// the duration of the invocation.
    ///
    /// # Errors
    ///
    /// Returns error only if the engine thread itself fails; engine faults
    /// come back as [`Outcome::Faulted`]
    pub async fn execute_once(&self, snapshot: Option<Snapshot>) -> CoreResult<Outcome> {
        let snapshot = snapshot.filter(Snapshot::is_valid);
        let resumed = snapshot.is_some();
        let engine = Arc::clone(&self.engine);
        let entry = self.config.program.entry();
        let args = self.config.args.clone();

        let started = Instant::now();
        let _guard = self.controller.begin_run();
        let outcome = tokio::task::spawn_blocking(move || match snapshot {
            Some(snapshot) => engine.resume(snapshot),
            None => engine.call(entry, &args),
        })
        .await
        .map_err(|e| CoreError::EngineFault {
            reason: format!("engine thread failed: {e}"),
        })?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Outcome::Completed(results) => {
                tracing::debug!(resumed, elapsed_ms, ?results, "invocation completed");
            }
            Outcome::Paused(snapshot) => {
                tracing::debug!(resumed, elapsed_ms, depth = snapshot.depth(), "invocation paused");
            }
            Outcome::Faulted(fault) => {
                tracing::debug!(resumed, elapsed_ms, %fault, "invocation faulted");
            }
        }
        Ok(outcome)
    }

    /// Run in this process until completion, export or abort
    ///
    /// # Errors
    ///
    /// Returns error on engine faults, unreadable snapshots or failed exports
    pub async fn run_local(&self, mut keys: Option<mpsc::Receiver<KeyAction>>) -> CoreResult<Exit> {
        let mut pending = self.load_initial()?;
        tracing::info!(
            program = self.config.program.name(),
            args = ?self.config.args,
            trigger = %self.controller.policy(),
            resuming = pending.is_some(),
            "local run"
        );

        // a resume-or-run pressed during a run gates the next iteration
        let mut queued: Option<KeyAction> = None;
        loop {
            if self.controller.policy().is_manual() {
                let action = match (queued.take(), keys.as_mut()) {
                    (Some(action), _) => Some(action),
                    (None, Some(rx)) => rx.recv().await,
                    (None, None) => None,
                };
                match action {
                    Some(KeyAction::ResumeOrRun) => {}
                    Some(KeyAction::SnapshotNow) => self.controller.request(),
                    Some(KeyAction::Abort) => return Ok(self.abort()),
                    None => {
                        tracing::warn!("keyboard closed while waiting for an action");
                        return Ok(self.abort());
                    }
                }
            }

            self.enter_run(pending.is_some())?;
            let outcome = {
                let run = self.execute_once(pending.take());
                tokio::pin!(run);
                loop {
                    tokio::select! {
                        outcome = &mut run => break Some(outcome?),
                        action = next_key(&mut keys) => match action {
                            KeyAction::SnapshotNow => self.controller.request(),
                            KeyAction::Abort => break None,
                            KeyAction::ResumeOrRun => queued = Some(KeyAction::ResumeOrRun),
                        },
                    }
                }
            };
            let Some(outcome) = outcome else {
                return Ok(self.abort());
            };

            match outcome {
                Outcome::Completed(results) => {
                    self.session().transition(MigrationState::Completed)?;
                    tracing::info!(?results, "computation completed");
                    return Ok(Exit::Completed(results));
                }
                Outcome::Paused(snapshot) => {
                    let snapshot = {
                        let mut session = self.session();
                        session.pause(snapshot)?;
                        session.take_pending()
                    };
                    if self.config.export_only {
                        if let Some(snapshot) = &snapshot {
                            return self.export(snapshot);
                        }
                    }
                    pending = snapshot;
                }
                Outcome::Faulted(fault) => {
                    tracing::error!(%fault, "engine fault");
                    return Err(fault.into());
                }
            }
        }
    }

    fn export(&self, snapshot: &Snapshot) -> CoreResult<Exit> {
        let file = SnapshotFile::new(&self.config.export_path);
        file.write(self.config.program.name(), snapshot)?;
        self.session().transition(MigrationState::Exported)?;
        tracing::info!(path = %file.path().display(), depth = snapshot.depth(), "snapshot exported");
        Ok(Exit::Exported(file.path().to_path_buf()))
    }

    /// Arm the breakpoint so an in-flight invocation stops, and report abort
    fn abort(&self) -> Exit {
        self.controller.request();
        tracing::info!("aborted execution");
        Exit::Aborted
    }

    /// Serve the peer protocol until the computation finishes here or the
    /// peer reports it finished
    ///
    /// # Errors
    ///
    /// Returns error on engine faults or failed peer calls
    pub async fn run_remote(
        self: &Arc<Self>,
        server: PeerServer,
        mut keys: Option<mpsc::Receiver<KeyAction>>,
    ) -> CoreResult<Exit> {
        let initial = if self.config.start_immediately {
            self.load_initial()?
        } else {
            if self.config.from_snapshot.is_some() {
                tracing::warn!("stored snapshot is only used together with start");
            }
            None
        };

        let shutdown = CancellationToken::new();
        let (events, mut inbox) = mpsc::unbounded_channel();
        let handler = Arc::new(PeerHandler {
            coordinator: Arc::clone(self),
            events: events.clone(),
            shutdown: shutdown.clone(),
        });

        tracing::info!(
            program = self.config.program.name(),
            listen = %server.local_addr(),
            peer = self.config.peer.as_deref().unwrap_or_default(),
            trigger = %self.controller.policy(),
            session = %self.session().session_id(),
            "remote mode"
        );
        let server_task = tokio::spawn(server.serve(handler, shutdown.clone()));

        if self.config.start_immediately {
            self.enter_run(initial.is_some())?;
            self.spawn_run(initial, events, shutdown.clone());
        } else {
            drop(events);
        }

        let result = loop {
            tokio::select! {
                event = inbox.recv() => match event {
                    Some(RemoteEvent::Completed(results)) => break Ok(Exit::Completed(results)),
                    Some(RemoteEvent::Finished) => {
                        tokio::time::sleep(self.config.finish_grace).await;
                        break Ok(Exit::Finished);
                    }
                    Some(RemoteEvent::Failed(err)) => break Err(err),
                    None => {
                        break Err(CoreError::Transport {
                            operation: "serve".to_string(),
                            reason: "peer server stopped".to_string(),
                        });
                    }
                },
                action = next_key(&mut keys) => match action {
                    KeyAction::Abort => break Ok(Exit::Aborted),
                    KeyAction::SnapshotNow => self.controller.request(),
                    KeyAction::ResumeOrRun => tracing::debug!("runs start on hand-off in remote mode"),
                },
            }
        };

        shutdown.cancel();
        if self.state().is_active() {
            self.controller.request();
        }
        match tokio::time::timeout(SERVER_DRAIN, server_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::warn!(error = %e, "peer server failed"),
            Ok(Err(e)) => tracing::warn!(error = %e, "peer server task failed"),
            Err(_) => tracing::warn!("peer server did not drain in time"),
        }
        if matches!(result, Ok(Exit::Aborted)) {
            tracing::info!("aborted execution");
        }
        result
    }

    /// Run one invocation in the background and report its result
    fn spawn_run(
        self: &Arc<Self>,
        snapshot: Option<Snapshot>,
        events: mpsc::UnboundedSender<RemoteEvent>,
        shutdown: CancellationToken,
    ) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let event = match coordinator.remote_run(snapshot, &shutdown).await {
                Ok(Some(event)) => event,
                Ok(None) => return,
                Err(err) => RemoteEvent::Failed(err),
            };
            let _ = events.send(event);
        });
    }

    async fn remote_run(
        &self,
        snapshot: Option<Snapshot>,
        shutdown: &CancellationToken,
    ) -> CoreResult<Option<RemoteEvent>> {
        let outcome = self.execute_once(snapshot).await?;
        if shutdown.is_cancelled() {
            tracing::debug!(outcome = outcome.label(), "discarding outcome after shutdown");
            return Ok(None);
        }

        match outcome {
            Outcome::Completed(results) => {
                let session_id = {
                    let mut session = self.session();
                    session.transition(MigrationState::Completed)?;
                    session.session_id()
                };
                tracing::info!(?results, "computation completed, notifying peer");
                self.client()?.finish(session_id).await?;
                Ok(Some(RemoteEvent::Completed(results)))
            }
            Outcome::Paused(snapshot) => {
                let (session_id, snapshot) = {
                    let mut session = self.session();
                    session.pause(snapshot)?;
                    let pending = session.take_pending();
                    session.transition(MigrationState::Transmitted)?;
                    (session.session_id(), pending)
                };
                let Some(snapshot) = snapshot else {
                    return Ok(None);
                };
                let depth = snapshot.depth();
                let response = self
                    .client()?
                    .execute(&ExecuteRequest::resume(
                        session_id,
                        self.config.program.name(),
                        snapshot,
                    ))
                    .await?;
                if !response.ok {
                    return Err(CoreError::Transport {
                        operation: "execute".to_string(),
                        reason: "peer refused the snapshot".to_string(),
                    });
                }
                tracing::info!(depth, session = %session_id, "snapshot transmitted");
                Ok(None)
            }
            Outcome::Faulted(fault) => {
                tracing::error!(%fault, "engine fault");
                Err(fault.into())
            }
        }
    }
}

/// Wait for the next key action; pends forever without a keyboard
async fn next_key(keys: &mut Option<mpsc::Receiver<KeyAction>>) -> KeyAction {
    if let Some(rx) = keys {
        if let Some(action) = rx.recv().await {
            return action;
        }
        *keys = None;
    }
    std::future::pending().await
}

/// Inbound side of the peer protocol
struct PeerHandler {
    coordinator: Arc<Coordinator>,
    events: mpsc::UnboundedSender<RemoteEvent>,
    shutdown: CancellationToken,
}

#[async_trait]
impl ExecutorService for PeerHandler {
    async fn execute(&self, request: ExecuteRequest) -> CoreResult<ExecuteResponse> {
        let program = self.coordinator.config.program.name();
        if request.program != program {
            tracing::warn!(
                session = %request.session_id,
                received = %request.program,
                expected = program,
                "refusing hand-off for another program"
            );
            return Ok(ExecuteResponse { ok: false });
        }
        request.check()?;

        let snapshot = request.resumable().cloned();
        let frames = snapshot.as_ref().map_or(0, Snapshot::depth);
        let snapshot = {
            let mut session = self.coordinator.session();
            let state = session.state();
            if state.is_active() || state.is_terminal() {
                tracing::warn!(session = %request.session_id, %state, "refusing hand-off");
                return Ok(ExecuteResponse { ok: false });
            }
            session.receive(request.session_id, snapshot)?;
            session.take_received()
        };

        tracing::info!(session = %request.session_id, frames, "hand-off accepted");
        self.coordinator
            .spawn_run(snapshot, self.events.clone(), self.shutdown.clone());
        Ok(ExecuteResponse { ok: true })
    }

    async fn finish(&self, request: FinishRequest) -> CoreResult<FinishResponse> {
        let (session_id, state) = {
            let session = self.coordinator.session();
            (session.session_id(), session.state())
        };
        if request.session_id != session_id || state != MigrationState::Transmitted {
            tracing::warn!(
                session = %request.session_id,
                current = %session_id,
                %state,
                "ignoring finish for a computation not handed off from here"
            );
            return Ok(FinishResponse {});
        }

        tracing::info!(session = %request.session_id, "peer finished");
        let _ = self.events.send(RemoteEvent::Finished);
        Ok(FinishResponse {})
    }
}
