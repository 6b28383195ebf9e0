use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::GateControlMode;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GateAction {
    Open,
    Close,
}

/// Per-command lifecycle: Scheduled -> Dispatched -> Confirmed | Failed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CommandStatus {
    Scheduled,
    Dispatched,
    Confirmed,
    Failed,
}

impl CommandStatus {
    pub fn may_transition_to(self, next: CommandStatus) -> bool {
        matches!(
            (self, next),
            (CommandStatus::Scheduled, CommandStatus::Dispatched)
                | (CommandStatus::Dispatched, CommandStatus::Confirmed)
                | (CommandStatus::Dispatched, CommandStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CommandStatus::Confirmed | CommandStatus::Failed)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid command transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: CommandStatus,
    pub to: CommandStatus,
}

/// A timed gate movement produced by the schedule builder and owned by the
/// dispatch queue until the control collaborator confirms or fails it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateCommand {
    pub id: Uuid,
    pub request_id: Uuid,
    pub gate_id: String,
    pub canal_section_id: String,
    pub action: GateAction,
    /// Target opening in [0, 100]. Zero for close commands.
    pub opening_percent: f64,
    pub scheduled_time: DateTime<Utc>,
    pub control_mode: GateControlMode,
    pub status: CommandStatus,
}

impl GateCommand {
    pub fn transition(&mut self, next: CommandStatus) -> Result<(), InvalidTransition> {
        if !self.status.may_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Raised when a dispatched command fails or times out; scoped to the
/// owning delivery request so unrelated requests keep their schedules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplanRequest {
    pub request_id: Uuid,
    pub failed_command_id: Uuid,
    pub gate_id: String,
    pub reason: String,
    pub raised_at: DateTime<Utc>,
}
