//! Session runtime: one task owns the controller and serializes user commands
//! with timer deadlines, publishing a fresh snapshot after every step.

use shared::{
    domain::{CaseId, Stage},
    protocol::{CaseEvent, CaseSnapshot},
};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info};

use crate::{controller::WorkflowController, error::DispatchError};

const COMMAND_QUEUE_CAPACITY: usize = 32;

type Reply<T> = oneshot::Sender<Result<T, DispatchError>>;

pub enum SessionCommand {
    Submit { symptoms: String, reply: Reply<CaseId> },
    RequestVideoConsult { reply: Reply<()> },
    EndCall { reply: Reply<()> },
    ToggleMicrophone { reply: Reply<bool> },
    ToggleCamera { reply: Reply<bool> },
    Retry { reply: Reply<Stage> },
    Dispose { reply: oneshot::Sender<Option<CaseId>> },
    Shutdown { reply: oneshot::Sender<()> },
}

impl SessionCommand {
    fn name(&self) -> &'static str {
        match self {
            SessionCommand::Submit { .. } => "submit",
            SessionCommand::RequestVideoConsult { .. } => "request_video_consult",
            SessionCommand::EndCall { .. } => "end_call",
            SessionCommand::ToggleMicrophone { .. } => "toggle_microphone",
            SessionCommand::ToggleCamera { .. } => "toggle_camera",
            SessionCommand::Retry { .. } => "retry",
            SessionCommand::Dispose { .. } => "dispose",
            SessionCommand::Shutdown { .. } => "shutdown",
        }
    }
}

/// Presentation-side handle to a running requester session.
///
/// Dropping the handle closes the command queue; the runtime then disposes
/// the active case, ending any live call, and stops.
pub struct DispatchSession {
    cmd_tx: mpsc::Sender<SessionCommand>,
    snapshots: watch::Receiver<CaseSnapshot>,
    events: broadcast::Sender<CaseEvent>,
    task: JoinHandle<()>,
}

impl DispatchSession {
    pub fn spawn(controller: WorkflowController) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (snapshot_tx, snapshots) = watch::channel(controller.snapshot());
        let events = controller.event_sender();
        let task = tokio::spawn(run_session(controller, cmd_rx, snapshot_tx));
        Self {
            cmd_tx,
            snapshots,
            events,
            task,
        }
    }

    pub fn snapshot(&self) -> CaseSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<CaseSnapshot> {
        self.snapshots.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CaseEvent> {
        self.events.subscribe()
    }

    pub async fn submit(&self, symptoms: impl Into<String>) -> Result<CaseId, DispatchError> {
        let symptoms = symptoms.into();
        self.request(|reply| SessionCommand::Submit { symptoms, reply })
            .await?
    }

    pub async fn request_video_consult(&self) -> Result<(), DispatchError> {
        self.request(|reply| SessionCommand::RequestVideoConsult { reply })
            .await?
    }

    pub async fn end_call(&self) -> Result<(), DispatchError> {
        self.request(|reply| SessionCommand::EndCall { reply })
            .await?
    }

    pub async fn toggle_microphone(&self) -> Result<bool, DispatchError> {
        self.request(|reply| SessionCommand::ToggleMicrophone { reply })
            .await?
    }

    pub async fn toggle_camera(&self) -> Result<bool, DispatchError> {
        self.request(|reply| SessionCommand::ToggleCamera { reply })
            .await?
    }

    pub async fn retry(&self) -> Result<Stage, DispatchError> {
        self.request(|reply| SessionCommand::Retry { reply }).await?
    }

    pub async fn dispose(&self) -> Result<Option<CaseId>, DispatchError> {
        self.request(|reply| SessionCommand::Dispose { reply }).await
    }

    /// Disposes the active case and waits for the runtime task to finish.
    pub async fn shutdown(self) -> Result<(), DispatchError> {
        self.request(|reply| SessionCommand::Shutdown { reply })
            .await?;
        self.task.await.map_err(|_| DispatchError::SessionClosed)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, DispatchError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| DispatchError::SessionClosed)?;
        reply_rx.await.map_err(|_| DispatchError::SessionClosed)
    }
}

async fn run_session(
    mut controller: WorkflowController,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    snapshot_tx: watch::Sender<CaseSnapshot>,
) {
    let epoch = Instant::now();
    info!("session: started");

    loop {
        let deadline = controller.next_due().map(|due| epoch + due);
        tokio::select! {
            cmd = cmd_rx.recv() => {
                controller.advance_to(epoch.elapsed()).await;
                let Some(cmd) = cmd else {
                    controller.dispose().await;
                    break;
                };
                debug!(command = cmd.name(), "session: command received");
                match cmd {
                    SessionCommand::Shutdown { reply } => {
                        controller.dispose().await;
                        snapshot_tx.send_replace(controller.snapshot());
                        let _ = reply.send(());
                        break;
                    }
                    cmd => handle_command(&mut controller, cmd, &snapshot_tx).await,
                }
            }
            _ = sleep_until_deadline(deadline) => {
                controller.advance_to(epoch.elapsed()).await;
                snapshot_tx.send_replace(controller.snapshot());
            }
        }
    }

    snapshot_tx.send_replace(controller.snapshot());
    info!(
        "session: stopped leaked_timer_fires={}",
        controller.leaked_timer_fires()
    );
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}

/// Applies one command, publishing the new snapshot before replying so a
/// caller that awaits the reply always observes its own effect.
async fn handle_command(
    controller: &mut WorkflowController,
    cmd: SessionCommand,
    snapshot_tx: &watch::Sender<CaseSnapshot>,
) {
    let name = cmd.name();
    match cmd {
        SessionCommand::Submit { symptoms, reply } => {
            let result = controller.submit(&symptoms);
            settle(controller, snapshot_tx, name, result, reply);
        }
        SessionCommand::RequestVideoConsult { reply } => {
            let result = controller.request_video_consult().await;
            settle(controller, snapshot_tx, name, result, reply);
        }
        SessionCommand::EndCall { reply } => {
            let result = controller.end_call().await;
            settle(controller, snapshot_tx, name, result, reply);
        }
        SessionCommand::ToggleMicrophone { reply } => {
            let result = controller.toggle_microphone().await;
            settle(controller, snapshot_tx, name, result, reply);
        }
        SessionCommand::ToggleCamera { reply } => {
            let result = controller.toggle_camera().await;
            settle(controller, snapshot_tx, name, result, reply);
        }
        SessionCommand::Retry { reply } => {
            let result = controller.retry().await;
            settle(controller, snapshot_tx, name, result, reply);
        }
        SessionCommand::Dispose { reply } => {
            let disposed = controller.dispose().await;
            snapshot_tx.send_replace(controller.snapshot());
            let _ = reply.send(disposed);
        }
        SessionCommand::Shutdown { reply } => {
            let _ = reply.send(());
        }
    }
}

fn settle<T>(
    controller: &WorkflowController,
    snapshot_tx: &watch::Sender<CaseSnapshot>,
    command: &'static str,
    result: Result<T, DispatchError>,
    reply: Reply<T>,
) {
    if let Err(err) = &result {
        debug!(command, "session: command rejected err={err}");
        controller.broadcast_error(err);
    }
    snapshot_tx.send_replace(controller.snapshot());
    let _ = reply.send(result);
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
