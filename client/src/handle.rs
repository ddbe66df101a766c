use crate::error::ClientError;
use crate::events::{ClientEvent, Command};
use shared::ClientId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Handle to a running session, whichever topology drives it.
///
/// Operations are queued to the session task and never block. Dropping the
/// handle closes the command channel, which the session treats as a leave.
pub struct SessionHandle {
    client_id: ClientId,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub(crate) fn new(
        client_id: ClientId,
        commands: mpsc::UnboundedSender<Command>,
        events: mpsc::UnboundedReceiver<ClientEvent>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            client_id,
            commands,
            events,
            task,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command)?;
        Ok(())
    }

    pub fn request_join(&self, name: &str) -> Result<(), ClientError> {
        self.send(Command::Join {
            name: name.to_string(),
        })
    }

    pub fn report_self_state(&self, y: f32, velocity: f32, score: u32) -> Result<(), ClientError> {
        self.send(Command::ReportState { y, velocity, score })
    }

    pub fn report_self_died(&self) -> Result<(), ClientError> {
        self.send(Command::ReportDied)
    }

    pub fn request_ready_restart(&self) -> Result<(), ClientError> {
        self.send(Command::ReadyRestart)
    }

    /// Next event, or `None` once the session has ended.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<ClientEvent> {
        self.events.try_recv().ok()
    }

    /// Leaves cleanly and waits for the session to wind down.
    pub async fn leave(self) -> Result<(), ClientError> {
        self.send(Command::Leave)?;
        self.task.await.map_err(|_| ClientError::ChannelClosed)
    }

    /// Stops the session without telling anyone, as a crash would.
    pub fn abort(self) {
        self.task.abort();
    }
}
