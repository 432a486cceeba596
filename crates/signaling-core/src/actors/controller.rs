//! `SignalingControllerActor` - supervisor for per-meeting signaling actors.
//!
//! The controller:
//!
//! - Is created once per client
//! - Supervises N `MeetingSignalingActor` instances
//! - Owns the root `CancellationToken`; each meeting gets a child token
//! - Detects meeting actors that exited or panicked (via `JoinHandle`)
//!
//! # Graceful Shutdown
//!
//! 1. Sets `accepting_new = false`
//! 2. Cancels the root `CancellationToken` (propagates to all meetings)
//! 3. Waits a bounded time for each meeting actor to stop

use crate::collaborators::MeetingDependencies;
use crate::config::Config;
use crate::errors::SignalingError;
use crate::roap::SignalingAction;

use super::meeting::{MeetingSignalingActor, MeetingSignalingHandle};
use super::messages::{ControllerMessage, ControllerStatus, MeetingInfo};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::types::CorrelationId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 1000;

/// How long removal waits for a meeting actor to stop.
const MEETING_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long shutdown waits for each meeting actor to stop.
const SHUTDOWN_MEETING_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle to the `SignalingControllerActor`.
///
/// This is the public entry point of the signaling core.
#[derive(Clone)]
pub struct SignalingControllerHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
}

impl SignalingControllerHandle {
    /// Spawn the controller actor and return a handle to it.
    ///
    /// Every meeting created through this handle uses `deps`.
    #[must_use]
    pub fn new(config: Config, deps: MeetingDependencies) -> Self {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let metrics = ActorMetrics::new();

        let actor = SignalingControllerActor::new(
            config,
            deps,
            receiver,
            cancel_token.clone(),
            Arc::clone(&metrics),
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            metrics,
        }
    }

    /// Create the signaling actor for a meeting.
    pub async fn create_meeting(
        &self,
        meeting_id: CorrelationId,
    ) -> Result<MeetingSignalingHandle, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::CreateMeeting {
                meeting_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))?
    }

    /// Handle of a running meeting actor.
    pub async fn meeting_handle(
        &self,
        meeting_id: CorrelationId,
    ) -> Result<MeetingSignalingHandle, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::GetHandle {
                meeting_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get information about an existing meeting.
    pub async fn get_meeting(&self, meeting_id: CorrelationId) -> Result<MeetingInfo, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::GetMeeting {
                meeting_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))?
    }

    /// Stop and forget a meeting's actor.
    pub async fn remove_meeting(&self, meeting_id: CorrelationId) -> Result<(), SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::RemoveMeeting {
                meeting_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))?
    }

    /// Route a signaling action to a meeting's coordinator.
    pub async fn submit(
        &self,
        meeting_id: CorrelationId,
        action: SignalingAction,
    ) -> Result<(), SignalingError> {
        self.meeting_handle(meeting_id).await?.submit(action).await
    }

    pub async fn get_status(&self) -> Result<ControllerStatus, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown.
    pub async fn shutdown(&self) -> Result<(), SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the controller and every meeting actor immediately.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Shared actor counters.
    #[must_use]
    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        &self.metrics
    }
}

/// Internal state for a managed meeting.
struct ManagedMeeting {
    handle: MeetingSignalingHandle,
    task_handle: JoinHandle<()>,
}

/// The `SignalingControllerActor` implementation.
pub struct SignalingControllerActor {
    config: Config,
    deps: MeetingDependencies,
    receiver: mpsc::Receiver<ControllerMessage>,
    cancel_token: CancellationToken,
    meetings: HashMap<CorrelationId, ManagedMeeting>,
    accepting_new: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl SignalingControllerActor {
    fn new(
        config: Config,
        deps: MeetingDependencies,
        receiver: mpsc::Receiver<ControllerMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Controller, config.client_id.clone());

        Self {
            config,
            deps,
            receiver,
            cancel_token,
            meetings: HashMap::new(),
            accepting_new: true,
            metrics,
            mailbox,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "signaling.actor.controller", fields(client_id = %self.config.client_id))]
    async fn run(mut self) {
        info!(
            target: "signaling.actor.controller",
            client_id = %self.config.client_id,
            "SignalingControllerActor started"
        );

        loop {
            self.check_meeting_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "signaling.actor.controller",
                        client_id = %self.config.client_id,
                        "SignalingControllerActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_received(self.receiver.len());
                            self.handle_message(message).await;
                        }
                        None => {
                            info!(
                                target: "signaling.actor.controller",
                                client_id = %self.config.client_id,
                                "SignalingControllerActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "signaling.actor.controller",
            client_id = %self.config.client_id,
            messages_processed = self.mailbox.messages_processed(),
            "SignalingControllerActor stopped"
        );
    }

    async fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::CreateMeeting {
                meeting_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.create_meeting(meeting_id));
            }

            ControllerMessage::GetHandle {
                meeting_id,
                respond_to,
            } => {
                let result = self
                    .meetings
                    .get(&meeting_id)
                    .map(|managed| managed.handle.clone())
                    .ok_or_else(|| SignalingError::MeetingNotFound(meeting_id.to_string()));
                let _ = respond_to.send(result);
            }

            ControllerMessage::GetMeeting {
                meeting_id,
                respond_to,
            } => {
                let result = self.get_meeting(&meeting_id).await;
                let _ = respond_to.send(result);
            }

            ControllerMessage::RemoveMeeting {
                meeting_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.remove_meeting(&meeting_id));
            }

            ControllerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            ControllerMessage::Shutdown { respond_to } => {
                info!(
                    target: "signaling.actor.controller",
                    client_id = %self.config.client_id,
                    meeting_count = self.meetings.len(),
                    "Initiating graceful shutdown"
                );
                self.accepting_new = false;
                self.cancel_token.cancel();
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    fn create_meeting(
        &mut self,
        meeting_id: CorrelationId,
    ) -> Result<MeetingSignalingHandle, SignalingError> {
        if !self.accepting_new {
            return Err(SignalingError::Draining);
        }

        if self.meetings.contains_key(&meeting_id) {
            return Err(SignalingError::Conflict("Meeting already exists".to_string()));
        }

        let (handle, task_handle) = MeetingSignalingActor::spawn(
            meeting_id.clone(),
            &self.config,
            self.deps.clone(),
            self.cancel_token.child_token(),
        );

        self.meetings.insert(
            meeting_id.clone(),
            ManagedMeeting {
                handle: handle.clone(),
                task_handle,
            },
        );
        self.metrics.meeting_created();

        info!(
            target: "signaling.actor.controller",
            client_id = %self.config.client_id,
            meeting_id = %meeting_id,
            total_meetings = self.meetings.len(),
            "Meeting signaling actor created"
        );

        Ok(handle)
    }

    async fn get_meeting(&self, meeting_id: &CorrelationId) -> Result<MeetingInfo, SignalingError> {
        let managed = self
            .meetings
            .get(meeting_id)
            .ok_or_else(|| SignalingError::MeetingNotFound(meeting_id.to_string()))?;

        let state = managed.handle.get_state().await?;
        Ok(MeetingInfo {
            meeting_id: state.meeting_id,
            is_busy: state.is_busy,
            last_roap_seq: state.last_roap_seq,
            locus_position: state.locus_position,
            destroyed: state.destroyed,
        })
    }

    /// Cancel a meeting actor without blocking the message loop on its exit.
    fn remove_meeting(&mut self, meeting_id: &CorrelationId) -> Result<(), SignalingError> {
        let managed = self
            .meetings
            .remove(meeting_id)
            .ok_or_else(|| SignalingError::MeetingNotFound(meeting_id.to_string()))?;

        managed.handle.cancel();

        let meeting_id_owned = meeting_id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(MEETING_STOP_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => debug!(
                    target: "signaling.actor.controller",
                    meeting_id = %meeting_id_owned,
                    "Meeting signaling actor stopped cleanly"
                ),
                Ok(Err(e)) => warn!(
                    target: "signaling.actor.controller",
                    meeting_id = %meeting_id_owned,
                    error = ?e,
                    "Meeting signaling actor panicked during removal"
                ),
                Err(_) => warn!(
                    target: "signaling.actor.controller",
                    meeting_id = %meeting_id_owned,
                    "Meeting signaling actor stop timed out"
                ),
            }
        });

        self.metrics.meeting_removed();

        info!(
            target: "signaling.actor.controller",
            client_id = %self.config.client_id,
            meeting_id = %meeting_id,
            total_meetings = self.meetings.len(),
            "Meeting signaling actor removed"
        );

        Ok(())
    }

    fn get_status(&self) -> ControllerStatus {
        ControllerStatus {
            meeting_count: self.meetings.len(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    async fn graceful_shutdown(&mut self) {
        self.accepting_new = false;

        for managed in self.meetings.values() {
            managed.handle.cancel();
        }

        for (meeting_id, managed) in self.meetings.drain() {
            match tokio::time::timeout(SHUTDOWN_MEETING_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    target: "signaling.actor.controller",
                    meeting_id = %meeting_id,
                    error = ?e,
                    "Meeting signaling actor panicked during shutdown"
                ),
                Err(_) => warn!(
                    target: "signaling.actor.controller",
                    meeting_id = %meeting_id,
                    "Meeting signaling actor shutdown timed out"
                ),
            }
            self.metrics.meeting_removed();
        }

        info!(
            target: "signaling.actor.controller",
            client_id = %self.config.client_id,
            "Graceful shutdown complete"
        );
    }

    /// Forget meeting actors whose task ended on its own.
    async fn check_meeting_health(&mut self) {
        let finished: Vec<CorrelationId> = self
            .meetings
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        for meeting_id in finished {
            let Some(managed) = self.meetings.remove(&meeting_id) else {
                continue;
            };

            match managed.task_handle.await {
                Ok(()) => info!(
                    target: "signaling.actor.controller",
                    meeting_id = %meeting_id,
                    "Meeting signaling actor exited"
                ),
                Err(join_error) if join_error.is_panic() => {
                    error!(
                        target: "signaling.actor.controller",
                        meeting_id = %meeting_id,
                        error = ?join_error,
                        "Meeting signaling actor panicked"
                    );
                    self.metrics.record_panic(ActorType::Meeting);
                }
                Err(_) => {}
            }

            self.metrics.meeting_removed();
        }
    }
}
