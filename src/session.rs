use axum::extract::ws;
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::SessionsConfig;
use crate::exam::messages::{
    ClientToServerMessage, ServerToClientMessage, SessionCommand, SessionEvent,
    client_message_from_ws_text,
};
use crate::exam::{
    CommandOutcome, EditingSession, LockRegistry, Notice, Question, SessionError, SessionView,
};
use crate::generation::{GeneratedDocuments, GenerationClient};
use crate::lock_store::LockStore;
use crate::pool::QuestionPoolCache;

#[derive(Debug, Serialize, Clone)]
pub struct SessionDetails {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub pool_size: usize,
    /// The id was supplied by the caller, so persisted locks were looked up.
    pub resumed: bool,
}

/// Result of a command sent through [`SessionActorHandle::execute`].
#[derive(Debug, Serialize, Clone)]
pub struct CommandReply {
    pub outcome: CommandOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<GeneratedDocuments>,
    pub view: SessionView,
}

#[derive(Debug)]
pub enum SessionManagerMessage {
    CreateSession {
        resume_id: Option<Uuid>,
        respond_to: oneshot::Sender<Result<SessionDetails, String>>,
    },
    GetSessionHandle {
        session_id: Uuid,
        respond_to: oneshot::Sender<Option<SessionActorHandle>>,
    },
    ListSessions {
        respond_to: oneshot::Sender<Vec<SessionDetails>>,
    },
    PoolChanged {
        pool: Arc<Vec<Question>>,
        respond_to: oneshot::Sender<usize>,
    },
    SessionActorShutdown {
        session_id: Uuid,
    },
}

struct SessionEntry {
    handle: SessionActorHandle,
    details: SessionDetails,
}

/// Shared dependencies every session actor is spawned with.
#[derive(Clone)]
pub struct SessionServices {
    pub pool: Arc<QuestionPoolCache>,
    pub lock_store: Arc<dyn LockStore>,
    pub generation: GenerationClient,
    pub config: SessionsConfig,
}

pub struct SessionManagerActor {
    receiver: mpsc::Receiver<SessionManagerMessage>,
    sessions: HashMap<Uuid, SessionEntry>,
    self_sender: mpsc::Sender<SessionManagerMessage>,
    services: SessionServices,
}

impl SessionManagerActor {
    fn new(
        receiver: mpsc::Receiver<SessionManagerMessage>,
        self_sender: mpsc::Sender<SessionManagerMessage>,
        services: SessionServices,
    ) -> Self {
        SessionManagerActor {
            receiver,
            sessions: HashMap::new(),
            self_sender,
            services,
        }
    }

    #[tracing::instrument(skip(self, msg), fields(
        msg_type = %std::any::type_name_of_val(&msg)
    ))]
    async fn handle_message(&mut self, msg: SessionManagerMessage) {
        match msg {
            SessionManagerMessage::CreateSession {
                resume_id,
                respond_to,
            } => {
                if let Some(session_id) = resume_id
                    && let Some(entry) = self.sessions.get(&session_id)
                {
                    tracing::info!(session.id = %session_id, "Session already running, reusing it");
                    let _ = respond_to.send(Ok(entry.details.clone()));
                    return;
                }

                let session_id = resume_id.unwrap_or_else(Uuid::new_v4);
                let pool = self.services.pool.questions().await;
                let metadata = self.services.pool.metadata().await;

                let details = SessionDetails {
                    session_id,
                    created_at: Utc::now(),
                    pool_size: pool.len(),
                    resumed: resume_id.is_some(),
                };
                let manager_handle = SessionManagerHandle {
                    sender: self.self_sender.clone(),
                };
                let handle = SessionActorHandle::spawn(
                    EditingSession::new(session_id, pool, (*metadata).clone(), LockRegistry::new()),
                    manager_handle,
                    self.services.clone(),
                );

                tracing::info!(
                    session.id = %session_id,
                    pool.questions.count = details.pool_size,
                    session.resumed = details.resumed,
                    "Created session"
                );
                self.sessions.insert(
                    session_id,
                    SessionEntry {
                        handle,
                        details: details.clone(),
                    },
                );
                let _ = respond_to.send(Ok(details));
            }
            SessionManagerMessage::GetSessionHandle {
                session_id,
                respond_to,
            } => {
                tracing::debug!(session.id = %session_id, "Received GetSessionHandle request");
                let handle = self.sessions.get(&session_id).map(|entry| entry.handle.clone());
                let _ = respond_to.send(handle);
            }
            SessionManagerMessage::ListSessions { respond_to } => {
                let mut sessions: Vec<SessionDetails> = self
                    .sessions
                    .values()
                    .map(|entry| entry.details.clone())
                    .collect();
                sessions.sort_by_key(|details| details.created_at);
                let _ = respond_to.send(sessions);
            }
            SessionManagerMessage::PoolChanged { pool, respond_to } => {
                let mut notified = 0;
                for (session_id, entry) in &self.sessions {
                    if entry.handle.force_refresh_locks(Some(pool.clone())).await {
                        notified += 1;
                    } else {
                        tracing::warn!(session.id = %session_id, "Session did not accept pool refresh");
                    }
                }
                tracing::info!(
                    pool.questions.count = pool.len(),
                    sessions.notified = notified,
                    "Signalled pool refresh to sessions"
                );
                let _ = respond_to.send(notified);
            }
            SessionManagerMessage::SessionActorShutdown { session_id } => {
                if self.sessions.remove(&session_id).is_some() {
                    tracing::info!(session.id = %session_id, "Cleaning up session after actor shutdown");
                } else {
                    tracing::warn!(session.id = %session_id, "Received shutdown for unknown session");
                }
            }
        }
    }
}

#[tracing::instrument(skip(actor))]
pub async fn run_session_manager_actor(mut actor: SessionManagerActor) {
    tracing::info!("SessionManager actor started");
    while let Some(msg) = actor.receiver.recv().await {
        actor.handle_message(msg).await;
    }
    tracing::info!("SessionManager actor stopped");
}

#[derive(Clone, Debug)]
pub struct SessionManagerHandle {
    sender: mpsc::Sender<SessionManagerMessage>,
}

impl SessionManagerHandle {
    pub fn spawn(buffer_size: usize, services: SessionServices) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = SessionManagerActor::new(receiver, sender.clone(), services);
        tokio::spawn(run_session_manager_actor(actor));
        Self { sender }
    }

    pub async fn create_session(&self, resume_id: Option<Uuid>) -> Result<SessionDetails, String> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(SessionManagerMessage::CreateSession {
                resume_id,
                respond_to,
            })
            .await
            .map_err(|e| format!("Failed to send CreateSession: {}", e))?;
        rx.await
            .map_err(|e| format!("SessionManager no response: {}", e))?
    }

    pub async fn get_session_handle(&self, session_id: Uuid) -> Option<SessionActorHandle> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(SessionManagerMessage::GetSessionHandle {
                session_id,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn list_sessions(&self) -> Vec<SessionDetails> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(SessionManagerMessage::ListSessions { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Hands the new pool to every running session and makes them re-read
    /// their locks. Returns how many sessions were signalled.
    pub async fn pool_changed(&self, pool: Arc<Vec<Question>>) -> Result<usize, String> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(SessionManagerMessage::PoolChanged { pool, respond_to })
            .await
            .map_err(|e| format!("Failed to send PoolChanged: {}", e))?;
        rx.await
            .map_err(|e| format!("SessionManager no response: {}", e))
    }

    pub async fn notify_session_shutdown(&self, session_id: Uuid) -> Result<(), String> {
        self.sender
            .send(SessionManagerMessage::SessionActorShutdown { session_id })
            .await
            .map_err(|e| format!("Failed to send SessionActorShutdown: {}", e))
    }
}

#[derive(Debug)]
pub enum SessionActorMessage {
    ClientEvent {
        client_id: Uuid,
        raw_payload: String,
    },
    ClientConnected {
        client_id: Uuid,
        client_tx: mpsc::Sender<ws::Message>,
    },
    ClientDisconnected {
        client_id: Uuid,
    },
    Command {
        command: SessionCommand,
        respond_to: oneshot::Sender<Result<CommandReply, SessionError>>,
    },
    Snapshot {
        respond_to: oneshot::Sender<SessionView>,
    },
    ForceRefreshLocks {
        pool: Option<Arc<Vec<Question>>>,
    },
}

pub struct SessionActor {
    receiver: mpsc::Receiver<SessionActorMessage>,
    session_id: Uuid,
    session: EditingSession,
    clients: HashMap<Uuid, mpsc::Sender<ws::Message>>,
    manager_handle: SessionManagerHandle,
    lock_store: Arc<dyn LockStore>,
    generation: GenerationClient,
    rng: StdRng,
}

impl SessionActor {
    fn new(
        receiver: mpsc::Receiver<SessionActorMessage>,
        session: EditingSession,
        manager_handle: SessionManagerHandle,
        lock_store: Arc<dyn LockStore>,
        generation: GenerationClient,
    ) -> Self {
        SessionActor {
            receiver,
            session_id: session.session_id(),
            session,
            clients: HashMap::new(),
            manager_handle,
            lock_store,
            generation,
            rng: StdRng::from_entropy(),
        }
    }

    #[tracing::instrument(skip(self, msg), fields(
        session.id = %self.session_id,
        msg_type = %std::any::type_name_of_val(&msg)
    ))]
    async fn handle_message(&mut self, msg: SessionActorMessage) {
        match msg {
            SessionActorMessage::ClientEvent {
                client_id,
                raw_payload,
            } => {
                tracing::trace!(client.id = %client_id, event.raw = %raw_payload, "Raw event from client");
                match client_message_from_ws_text(&raw_payload) {
                    Ok(ClientToServerMessage::Command(command)) => {
                        let command_name = command.name();
                        match self.run_command(command).await {
                            Ok(reply) => {
                                let event = SessionEvent::CommandApplied {
                                    command: command_name.to_string(),
                                    outcome: reply.outcome,
                                };
                                self.send_event(client_id, &event).await;
                            }
                            Err(e) => {
                                let event = SessionEvent::Notice(Notice::warning(e.to_string()));
                                self.send_event(client_id, &event).await;
                            }
                        }
                    }
                    Ok(ClientToServerMessage::LeaveSession) => {
                        tracing::info!(client.id = %client_id, "Client left session");
                        self.clients.remove(&client_id);
                    }
                    Ok(ClientToServerMessage::ConnectToSession { .. }) => {
                        self.send_system_error(client_id, "Already connected to a session.".to_string())
                            .await;
                    }
                    Err(e) => {
                        tracing::warn!(
                            client.id = %client_id,
                            error = %e,
                            event.raw = %raw_payload,
                            "Failed to deserialize event from client"
                        );
                        self.send_system_error(
                            client_id,
                            format!(
                                "Invalid message format: {}. Please send JSON like: {{\"messageType\":\"Command\",\"payload\":{{\"command\":\"Shuffle\"}}}}",
                                e
                            ),
                        )
                        .await;
                    }
                }
            }
            SessionActorMessage::ClientConnected {
                client_id,
                client_tx,
            } => {
                tracing::debug!(client.id = %client_id, "Client connected");
                self.clients.insert(client_id, client_tx);
                let event = SessionEvent::StateUpdated(self.session.view());
                self.send_event(client_id, &event).await;
            }
            SessionActorMessage::ClientDisconnected { client_id } => {
                tracing::debug!(client.id = %client_id, "Client disconnected");
                self.clients.remove(&client_id);
            }
            SessionActorMessage::Command {
                command,
                respond_to,
            } => {
                let result = self.run_command(command).await;
                let _ = respond_to.send(result);
            }
            SessionActorMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(self.session.view());
            }
            SessionActorMessage::ForceRefreshLocks { pool } => {
                if let Some(pool) = pool {
                    self.session.replace_pool(pool);
                }
                self.reload_locks().await;
                self.broadcast_state().await;
            }
        }
    }

    async fn run_command(&mut self, command: SessionCommand) -> Result<CommandReply, SessionError> {
        let command_name = command.name();
        tracing::debug!(command = command_name, "Applying command");

        let result = match command {
            SessionCommand::RefreshLocks => {
                self.reload_locks().await;
                Ok((CommandOutcome::default(), None))
            }
            SessionCommand::Generate {
                selected_template,
                selected_word_template,
            } => {
                self.generate(selected_template, selected_word_template)
                    .await
            }
            other => self
                .session
                .apply(other, &mut self.rng)
                .map(|outcome| (outcome, None)),
        };

        let (outcome, documents) = result.map_err(|e| {
            tracing::warn!(command = command_name, error = %e, "Command rejected");
            e
        })?;

        if outcome.locks_changed {
            self.persist_locks().await;
        }
        for notice in &outcome.notices {
            self.broadcast_event(&SessionEvent::Notice(notice.clone()))
                .await;
        }
        if let Some(documents) = &documents {
            self.broadcast_event(&SessionEvent::DocumentsReady(documents.clone()))
                .await;
        }
        let view = self.session.view();
        self.broadcast_event(&SessionEvent::StateUpdated(view.clone()))
            .await;

        Ok(CommandReply {
            outcome,
            documents,
            view,
        })
    }

    /// Locks are cleared and persisted before the backend is called, so a
    /// failed generation still leaves every question unlocked.
    async fn generate(
        &mut self,
        selected_template: Option<String>,
        selected_word_template: Option<String>,
    ) -> Result<(CommandOutcome, Option<GeneratedDocuments>), SessionError> {
        let (template, word_template) = self
            .generation
            .templates_or_default(selected_template, selected_word_template);
        let (request, mut outcome) =
            self.session
                .prepare_generation(template, word_template, &mut self.rng);

        self.persist_locks().await;
        outcome.locks_changed = false;
        self.broadcast_state().await;

        let documents = self.generation.generate(&request).await.map_err(|e| {
            tracing::error!(error = %e, "Exam generation failed");
            SessionError::Generation(e.to_string())
        })?;
        Ok((outcome, Some(documents)))
    }

    async fn load_locks(&self) -> LockRegistry {
        match self.lock_store.load(self.session_id).await {
            Ok(blob) => LockRegistry::from_blob(blob.as_deref()),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read persisted locks, starting unlocked");
                LockRegistry::new()
            }
        }
    }

    async fn reload_locks(&mut self) {
        let restored = self.load_locks().await;
        self.session.reload_locks(restored);
        tracing::debug!(
            locks.questions = self.session.locks().locked_question_count(),
            locks.categories = self.session.locks().locked_category_count(),
            "Reloaded persisted locks"
        );
    }

    /// An empty registry removes the blob instead of writing an empty one.
    async fn persist_locks(&self) {
        let locks = self.session.locks();
        let result = if locks.locked_question_count() == 0 && locks.locked_category_count() == 0 {
            self.lock_store.remove(self.session_id).await
        } else {
            match locks.to_blob() {
                Ok(blob) => self.lock_store.save(self.session_id, &blob).await,
                Err(e) => Err(e.into()),
            }
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to persist locks");
        }
    }

    async fn broadcast_state(&self) {
        self.broadcast_event(&SessionEvent::StateUpdated(self.session.view()))
            .await;
    }

    async fn broadcast_event(&self, event: &SessionEvent) {
        let Some(ws_msg) = self.encode_event(event) else {
            return;
        };
        for (client_id, client_tx) in &self.clients {
            if client_tx.send(ws_msg.clone()).await.is_err() {
                tracing::warn!(client.id = %client_id, "Failed to send event to client");
            }
        }
    }

    async fn send_event(&self, client_id: Uuid, event: &SessionEvent) {
        if let Some(client_tx) = self.clients.get(&client_id)
            && let Some(ws_msg) = self.encode_event(event)
            && client_tx.send(ws_msg).await.is_err()
        {
            tracing::warn!(client.id = %client_id, "Failed to send event to client");
        }
    }

    async fn send_system_error(&self, client_id: Uuid, message: String) {
        let error_response = ServerToClientMessage::SystemError { message };
        if let Some(client_tx) = self.clients.get(&client_id)
            && let Ok(ws_msg) = error_response.to_ws_text()
            && client_tx.send(ws_msg).await.is_err()
        {
            tracing::warn!(client.id = %client_id, "Failed to send error response to client");
        }
    }

    fn encode_event(&self, event: &SessionEvent) -> Option<ws::Message> {
        match ServerToClientMessage::new_session_event(self.session_id, event)
            .and_then(|message| message.to_ws_text())
        {
            Ok(ws_msg) => Some(ws_msg),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize session event");
                None
            }
        }
    }
}

#[tracing::instrument(skip(actor, idle_timeout), fields(session.id = %actor.session_id))]
pub async fn run_session_actor(mut actor: SessionActor, idle_timeout: StdDuration) {
    tracing::info!("Session actor started");
    actor.reload_locks().await;

    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            maybe_msg = actor.receiver.recv() => {
                match maybe_msg {
                    Some(msg) => {
                        if matches!(
                            msg,
                            SessionActorMessage::ClientEvent { .. }
                                | SessionActorMessage::ClientConnected { .. }
                                | SessionActorMessage::Command { .. }
                        ) {
                            last_activity = Instant::now();
                        }
                        actor.handle_message(msg).await;
                    }
                    None => {
                        tracing::info!("Session actor channel closed. Shutting down");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep_until(last_activity + idle_timeout) => {
                tracing::info!("Session inactivity timeout. Notifying manager for shutdown");
                if let Err(e) = actor.manager_handle.notify_session_shutdown(actor.session_id).await {
                    tracing::error!(error = %e, "Failed to notify SessionManager of shutdown");
                }
                break;
            }
        }
    }

    tracing::info!(
        clients.count = actor.clients.len(),
        "Session actor stopping"
    );
}

#[derive(Clone, Debug)]
pub struct SessionActorHandle {
    pub sender: mpsc::Sender<SessionActorMessage>,
    pub session_id: Uuid,
}

impl SessionActorHandle {
    pub fn spawn(
        session: EditingSession,
        manager_handle: SessionManagerHandle,
        services: SessionServices,
    ) -> Self {
        let session_id = session.session_id();
        let (sender, receiver) = mpsc::channel(services.config.channel_buffer);
        let actor = SessionActor::new(
            receiver,
            session,
            manager_handle,
            services.lock_store,
            services.generation,
        );
        let idle_timeout = StdDuration::from_secs(services.config.idle_timeout_minutes * 60);
        tokio::spawn(run_session_actor(actor, idle_timeout));
        Self { sender, session_id }
    }

    pub async fn forward_client_event(
        &self,
        client_id: Uuid,
        raw_payload: String,
    ) -> Result<(), String> {
        self.sender
            .send(SessionActorMessage::ClientEvent {
                client_id,
                raw_payload,
            })
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    pub async fn client_connected(&self, client_id: Uuid, client_tx: mpsc::Sender<ws::Message>) {
        if self
            .sender
            .send(SessionActorMessage::ClientConnected {
                client_id,
                client_tx,
            })
            .await
            .is_err()
        {
            tracing::error!("Failed to send ClientConnected");
        }
    }

    pub async fn client_disconnected(&self, client_id: Uuid) {
        if self
            .sender
            .send(SessionActorMessage::ClientDisconnected { client_id })
            .await
            .is_err()
        {
            tracing::error!("Failed to send ClientDisconnected");
        }
    }

    pub async fn execute(&self, command: SessionCommand) -> Result<CommandReply, SessionError> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(SessionActorMessage::Command {
                command,
                respond_to,
            })
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }

    pub async fn snapshot(&self) -> Result<SessionView, SessionError> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(SessionActorMessage::Snapshot { respond_to })
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    /// Returns `false` if the session is gone.
    pub async fn force_refresh_locks(&self, pool: Option<Arc<Vec<Question>>>) -> bool {
        self.sender
            .send(SessionActorMessage::ForceRefreshLocks { pool })
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GenerationConfig, PoolConfig, PoolSourceType};
    use crate::exam::identity::QuestionKey;
    use crate::exam::question::{Answer, QuestionType};
    use crate::lock_store::MemoryLockStore;
    use crate::pool::PoolSnapshot;
    use serde_json::Value as JsonValue;

    fn questions(prefix: &str) -> Vec<Question> {
        (0..4)
            .map(|i| {
                Question::new(
                    QuestionType::MultipleChoice,
                    Some("algebra"),
                    format!("{prefix} {i}"),
                    Answer::text("a"),
                )
            })
            .collect()
    }

    fn services(lock_store: Arc<dyn LockStore>) -> SessionServices {
        let pool = QuestionPoolCache::from_snapshot(
            PoolSnapshot {
                questions: questions("question"),
                ..PoolSnapshot::default()
            },
            PoolConfig {
                source_type: PoolSourceType::None,
                file_path: None,
                http_url: None,
            },
        );
        let generation = GenerationClient::new(&GenerationConfig {
            base_url: None,
            timeout_seconds: 5,
            default_template: "default".to_string(),
            default_word_template: "default".to_string(),
        })
        .unwrap();
        SessionServices {
            pool: Arc::new(pool),
            lock_store,
            generation,
            config: SessionsConfig {
                idle_timeout_minutes: 60,
                channel_buffer: 8,
            },
        }
    }

    async fn start(lock_store: Arc<dyn LockStore>, resume_id: Option<Uuid>) -> SessionActorHandle {
        let manager = SessionManagerHandle::spawn(8, services(lock_store));
        let details = manager.create_session(resume_id).await.unwrap();
        manager.get_session_handle(details.session_id).await.unwrap()
    }

    #[tokio::test]
    async fn test_lock_toggle_is_persisted() {
        let store = Arc::new(MemoryLockStore::new());
        let handle = start(store.clone(), None).await;

        let view = handle.snapshot().await.unwrap();
        let key = view.items[2].key.clone();
        let reply = handle
            .execute(SessionCommand::ToggleQuestionLock { key: key.clone() })
            .await
            .unwrap();
        assert!(reply.view.items[2].locked);

        let blob = store.load(handle.session_id).await.unwrap();
        let restored = LockRegistry::from_blob(blob.as_deref());
        assert!(restored.is_question_locked(&key));
    }

    #[tokio::test]
    async fn test_resumed_session_restores_locks() {
        let store = Arc::new(MemoryLockStore::new());
        let session_id = Uuid::new_v4();
        let key = QuestionKey::of(&questions("question")[1]);
        let mut stored = LockRegistry::new();
        stored.toggle_question_lock(&key);
        store
            .save(session_id, &stored.to_blob().unwrap())
            .await
            .unwrap();

        let handle = start(store, Some(session_id)).await;
        let view = handle.snapshot().await.unwrap();
        assert_eq!(view.locked_question_count, 1);
        assert!(view.items[1].locked);
    }

    #[tokio::test]
    async fn test_validation_error_is_returned_without_mutation() {
        let handle = start(Arc::new(MemoryLockStore::new()), None).await;
        let result = handle.execute(SessionCommand::ApplySelection).await;
        assert!(matches!(result, Err(SessionError::Selection(_))));
        assert_eq!(handle.snapshot().await.unwrap().items.len(), 4);
    }

    #[tokio::test]
    async fn test_generate_clears_locks_even_when_backend_missing() {
        let store = Arc::new(MemoryLockStore::new());
        let handle = start(store.clone(), None).await;
        let key = handle.snapshot().await.unwrap().items[0].key.clone();
        handle
            .execute(SessionCommand::ToggleQuestionLock { key })
            .await
            .unwrap();
        assert!(store.load(handle.session_id).await.unwrap().is_some());

        let result = handle
            .execute(SessionCommand::Generate {
                selected_template: None,
                selected_word_template: None,
            })
            .await;

        assert!(matches!(result, Err(SessionError::Generation(_))));
        assert_eq!(handle.snapshot().await.unwrap().locked_question_count, 0);
        assert_eq!(store.load(handle.session_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pool_change_reaches_sessions() {
        let manager = SessionManagerHandle::spawn(8, services(Arc::new(MemoryLockStore::new())));
        let details = manager.create_session(None).await.unwrap();
        let handle = manager.get_session_handle(details.session_id).await.unwrap();

        let mut new_pool = questions("question");
        new_pool.extend(questions("extra"));
        let notified = manager.pool_changed(Arc::new(new_pool)).await.unwrap();
        assert_eq!(notified, 1);

        let view = handle.snapshot().await.unwrap();
        assert_eq!(view.pool_size, 8);
        assert_eq!(view.items.len(), 4);
        assert_eq!(manager.list_sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_ws_client_receives_state_and_command_results() {
        let handle = start(Arc::new(MemoryLockStore::new()), None).await;
        let (client_tx, mut client_rx) = mpsc::channel(16);
        let client_id = Uuid::new_v4();
        handle.client_connected(client_id, client_tx).await;

        let event_type = |message: ws::Message| -> String {
            let ws::Message::Text(text) = message else {
                panic!("expected text message");
            };
            let value: JsonValue = serde_json::from_str(text.as_str()).unwrap();
            value["payload"]["event_data"]["event_type"]
                .as_str()
                .unwrap()
                .to_string()
        };

        assert_eq!(event_type(client_rx.recv().await.unwrap()), "StateUpdated");

        handle
            .forward_client_event(
                client_id,
                r#"{"messageType":"Command","payload":{"command":"Shuffle"}}"#.to_string(),
            )
            .await
            .unwrap();
        assert_eq!(event_type(client_rx.recv().await.unwrap()), "StateUpdated");
        assert_eq!(event_type(client_rx.recv().await.unwrap()), "CommandApplied");

        handle
            .forward_client_event(client_id, "garbage".to_string())
            .await
            .unwrap();
        let ws::Message::Text(text) = client_rx.recv().await.unwrap() else {
            panic!("expected text message");
        };
        assert!(text.as_str().contains("SystemError"));
    }
}
