use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{CommandStatus, GateAction, GateCommand, GateControlMode, ReplanRequest};
use crate::error::PlanError;

/// Outbound seam to the control collaborator: SCADA for automated gates,
/// a crew work queue for manually operated ones.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send(&self, command: &GateCommand) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// How long to wait for the collaborator's confirmation before marking
    /// a command failed and raising a replan.
    pub confirm_timeout_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            confirm_timeout_ms: 30_000,
        }
    }
}

/// Owns dispatched commands until the collaborator confirms or fails them.
///
/// Dispatch is fire-and-await per command: the sink send is async, then
/// the queue waits (bounded by the confirmation timeout) for `confirm` to
/// be called from the inbound event path. A timeout or explicit failure
/// transitions the command to Failed and raises a [`ReplanRequest`] scoped
/// to the owning delivery request only.
pub struct DispatchQueue {
    scada: Arc<dyn CommandSink>,
    crew: Arc<dyn CommandSink>,
    settings: DispatchSettings,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<bool>>>,
    replans: mpsc::UnboundedSender<ReplanRequest>,
}

impl DispatchQueue {
    pub fn new(
        scada: Arc<dyn CommandSink>,
        crew: Arc<dyn CommandSink>,
        settings: DispatchSettings,
    ) -> (Self, mpsc::UnboundedReceiver<ReplanRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                scada,
                crew,
                settings,
                pending: Mutex::new(HashMap::new()),
                replans: tx,
            },
            rx,
        )
    }

    /// Dispatch one command and drive its state machine to a terminal
    /// status. Returns the command with its final status; failures are
    /// reported through the replan channel as a side effect.
    pub async fn dispatch(&self, mut command: GateCommand) -> GateCommand {
        if let Err(err) = command.transition(CommandStatus::Dispatched) {
            warn!(command = %command.id, %err, "skipping dispatch");
            return command;
        }

        // Register before sending so a confirmation racing the send ack
        // still finds its waiter.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(command.id, tx);

        let sink = match command.control_mode {
            GateControlMode::Automated => &self.scada,
            GateControlMode::Manual => &self.crew,
        };
        if let Err(err) = sink.send(&command).await {
            self.pending.lock().remove(&command.id);
            self.fail(&mut command, format!("sink rejected command: {err}"));
            return command;
        }
        info!(
            command = %command.id,
            gate = %command.gate_id,
            action = %command.action,
            mode = %command.control_mode,
            "command dispatched"
        );

        let outcome = timeout(Duration::from_millis(self.settings.confirm_timeout_ms), rx).await;
        self.pending.lock().remove(&command.id);
        match outcome {
            Ok(Ok(true)) => {
                // Dispatched -> Confirmed is always legal here.
                let _ = command.transition(CommandStatus::Confirmed);
                info!(command = %command.id, gate = %command.gate_id, "command confirmed");
            }
            Ok(Ok(false)) => {
                self.fail(&mut command, "collaborator reported failure".to_string());
            }
            Ok(Err(_)) => {
                self.fail(&mut command, "confirmation channel dropped".to_string());
            }
            Err(_) => {
                self.fail(
                    &mut command,
                    format!(
                        "no confirmation within {} ms",
                        self.settings.confirm_timeout_ms
                    ),
                );
            }
        }
        command
    }

    /// Inbound confirmation event from the control collaborator. Returns
    /// false when no command with that id is awaiting confirmation.
    pub fn confirm(&self, command_id: Uuid, success: bool) -> bool {
        match self.pending.lock().remove(&command_id) {
            Some(tx) => tx.send(success).is_ok(),
            None => false,
        }
    }

    /// Cancel a request's commands. Undispatched commands are simply
    /// dropped; for gates already moved (dispatched or confirmed opens)
    /// water is physically in motion, so compensating close commands are
    /// returned for immediate dispatch instead of silent removal.
    pub fn cancel_request(&self, request_id: Uuid, commands: &[GateCommand]) -> Vec<GateCommand> {
        let now = Utc::now();
        let mut compensating = Vec::new();
        for cmd in commands.iter().filter(|c| c.request_id == request_id) {
            let in_motion = cmd.action == GateAction::Open
                && matches!(
                    cmd.status,
                    CommandStatus::Dispatched | CommandStatus::Confirmed
                );
            if !in_motion {
                continue;
            }
            compensating.push(GateCommand {
                id: Uuid::new_v4(),
                request_id,
                gate_id: cmd.gate_id.clone(),
                canal_section_id: cmd.canal_section_id.clone(),
                action: GateAction::Close,
                opening_percent: 0.0,
                scheduled_time: now,
                control_mode: cmd.control_mode,
                status: CommandStatus::Scheduled,
            });
        }
        if !compensating.is_empty() {
            warn!(
                request = %request_id,
                closes = compensating.len(),
                "cancellation after dispatch; compensating close commands enqueued"
            );
        }
        compensating
    }

    fn fail(&self, command: &mut GateCommand, reason: String) {
        let _ = command.transition(CommandStatus::Failed);
        let failure = PlanError::CommandDispatchFailure {
            command_id: command.id,
            gate_id: command.gate_id.clone(),
            reason,
        };
        error!(command = %command.id, %failure, "raising replan");
        let _ = self.replans.send(ReplanRequest {
            request_id: command.request_id,
            failed_command_id: command.id,
            gate_id: command.gate_id.clone(),
            reason: failure.to_string(),
            raised_at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GateControlMode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl CommandSink for RecordingSink {
        async fn send(&self, command: &GateCommand) -> Result<()> {
            self.sent.lock().push(command.id);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FailingSink {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl CommandSink for FailingSink {
        async fn send(&self, _command: &GateCommand) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("link down")
        }
    }

    fn command(mode: GateControlMode) -> GateCommand {
        GateCommand {
            id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            gate_id: "G1".into(),
            canal_section_id: "C1".into(),
            action: GateAction::Open,
            opening_percent: 60.0,
            scheduled_time: Utc::now(),
            control_mode: mode,
            status: CommandStatus::Scheduled,
        }
    }

    fn queue_with(
        scada: Arc<dyn CommandSink>,
        crew: Arc<dyn CommandSink>,
        timeout_ms: u64,
    ) -> (DispatchQueue, mpsc::UnboundedReceiver<ReplanRequest>) {
        DispatchQueue::new(
            scada,
            crew,
            DispatchSettings {
                confirm_timeout_ms: timeout_ms,
            },
        )
    }

    #[tokio::test]
    async fn test_confirmed_command_reaches_terminal_state() {
        let scada = Arc::new(RecordingSink::default());
        let (queue, mut replans) = queue_with(scada.clone(), Arc::new(RecordingSink::default()), 1_000);
        let queue = Arc::new(queue);
        let cmd = command(GateControlMode::Automated);
        let id = cmd.id;

        let q = Arc::clone(&queue);
        let dispatched = tokio::spawn(async move { q.dispatch(cmd).await });
        // Wait for the send to land, then confirm from the event path.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(queue.confirm(id, true));

        let done = dispatched.await.unwrap();
        assert_eq!(done.status, CommandStatus::Confirmed);
        assert_eq!(scada.sent.lock().as_slice(), &[id]);
        assert!(replans.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_timeout_fails_command_and_raises_replan() {
        let (queue, mut replans) = queue_with(
            Arc::new(RecordingSink::default()),
            Arc::new(RecordingSink::default()),
            20,
        );
        let cmd = command(GateControlMode::Automated);
        let request_id = cmd.request_id;

        let done = queue.dispatch(cmd).await;
        assert_eq!(done.status, CommandStatus::Failed);

        let replan = replans.try_recv().unwrap();
        assert_eq!(replan.request_id, request_id);
        assert_eq!(replan.failed_command_id, done.id);
        // The reason is the full dispatch-failure error, naming the
        // command, the gate, and the underlying cause.
        assert!(replan.reason.contains("failed to dispatch"));
        assert!(replan.reason.contains(&done.id.to_string()));
        assert!(replan.reason.contains("G1"));
        assert!(replan.reason.contains("no confirmation"));
    }

    #[tokio::test]
    async fn test_explicit_failure_from_collaborator() {
        let (queue, mut replans) = queue_with(
            Arc::new(RecordingSink::default()),
            Arc::new(RecordingSink::default()),
            1_000,
        );
        let queue = Arc::new(queue);
        let cmd = command(GateControlMode::Automated);
        let id = cmd.id;

        let q = Arc::clone(&queue);
        let dispatched = tokio::spawn(async move { q.dispatch(cmd).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(queue.confirm(id, false));

        let done = dispatched.await.unwrap();
        assert_eq!(done.status, CommandStatus::Failed);
        assert!(replans.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_sink_error_fails_without_waiting() {
        let scada = Arc::new(FailingSink::default());
        let (queue, mut replans) =
            queue_with(scada.clone(), Arc::new(RecordingSink::default()), 60_000);
        let cmd = command(GateControlMode::Automated);

        // Returns promptly despite the long confirmation timeout.
        let done = queue.dispatch(cmd).await;
        assert_eq!(done.status, CommandStatus::Failed);
        assert_eq!(scada.attempts.load(Ordering::SeqCst), 1);
        assert!(replans.try_recv().unwrap().reason.contains("link down"));
    }

    #[tokio::test]
    async fn test_manual_gates_route_to_crew_sink() {
        let scada = Arc::new(RecordingSink::default());
        let crew = Arc::new(RecordingSink::default());
        let (queue, _replans) = queue_with(scada.clone(), crew.clone(), 20);

        queue.dispatch(command(GateControlMode::Manual)).await;
        assert!(scada.sent.lock().is_empty());
        assert_eq!(crew.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_confirm_unknown_command_is_noop() {
        let (queue, _replans) = queue_with(
            Arc::new(RecordingSink::default()),
            Arc::new(RecordingSink::default()),
            20,
        );
        assert!(!queue.confirm(Uuid::new_v4(), true));
    }

    #[test]
    fn test_cancel_before_dispatch_has_no_side_effects() {
        let (queue, _replans) = queue_with(
            Arc::new(RecordingSink::default()),
            Arc::new(RecordingSink::default()),
            20,
        );
        let cmd = command(GateControlMode::Automated);
        let request_id = cmd.request_id;
        assert!(queue.cancel_request(request_id, &[cmd]).is_empty());
    }

    #[test]
    fn test_cancel_after_dispatch_emits_compensating_closes() {
        let (queue, _replans) = queue_with(
            Arc::new(RecordingSink::default()),
            Arc::new(RecordingSink::default()),
            20,
        );
        let mut opened = command(GateControlMode::Automated);
        opened.transition(CommandStatus::Dispatched).unwrap();
        opened.transition(CommandStatus::Confirmed).unwrap();
        let request_id = opened.request_id;

        let mut still_scheduled = command(GateControlMode::Automated);
        still_scheduled.request_id = request_id;
        still_scheduled.gate_id = "G2".into();

        let closes = queue.cancel_request(request_id, &[opened.clone(), still_scheduled]);
        assert_eq!(closes.len(), 1);
        assert_eq!(closes[0].gate_id, opened.gate_id);
        assert_eq!(closes[0].action, GateAction::Close);
        assert_eq!(closes[0].opening_percent, 0.0);
        assert_eq!(closes[0].status, CommandStatus::Scheduled);
    }
}
