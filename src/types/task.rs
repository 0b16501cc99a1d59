use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::TilingConfig;
use crate::error::{Result, TilerError};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Lifecycle of a tiling task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Created,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Completed, Failed and Cancelled are final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Finished tasks may be requeued to run again against their prior tiles.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Created, Queued)
                | (Completed, Queued)
                | (Failed, Queued)
                | (Cancelled, Queued)
                | (Created, Cancelled)
                | (Queued, Processing)
                | (Queued, Cancelled)
                | (Queued, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Created => "created",
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A request to tile one source model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilingTask {
    pub id: u64,
    pub name: String,
    /// Geometry source reference (file path or `synthetic:` URI).
    pub source: String,
    /// Storage prefix under which all output is written.
    pub output_path: String,
    /// `TilingConfig` serialized as JSON.
    pub config: String,
    pub status: TaskStatus,
    /// 0.0 ..= 100.0
    pub progress: f64,
    pub error_message: Option<String>,
    /// Outcome of the last index validation, recorded after repair.
    pub index_valid: Option<bool>,
    pub created_at: u64,
    pub updated_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
}

impl TilingTask {
    /// New task in `Created` state; `id` is assigned by the repository.
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        output_path: impl Into<String>,
        config: &TilingConfig,
    ) -> Result<Self> {
        let now = now_millis();
        Ok(Self {
            id: 0,
            name: name.into(),
            source: source.into(),
            output_path: output_path.into(),
            config: serde_json::to_string(config)?,
            status: TaskStatus::Created,
            progress: 0.0,
            error_message: None,
            index_valid: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        })
    }

    /// Deserialize the stored configuration.
    pub fn tiling_config(&self) -> Result<TilingConfig> {
        serde_json::from_str(&self.config)
            .map_err(|e| TilerError::Validation(format!("Invalid task configuration: {e}")))
    }

    /// Move to `next`, stamping timestamps. Illegal transitions are rejected.
    pub fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(TilerError::Validation(format!(
                "Task {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        let now = now_millis();
        self.status = next;
        self.updated_at = now;
        match next {
            TaskStatus::Queued => self.completed_at = None,
            TaskStatus::Processing => self.started_at = Some(now),
            s if s.is_terminal() => self.completed_at = Some(now),
            _ => {}
        }
        Ok(())
    }
}
