use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务种类：备份或恢复（两者互斥共用同一个任务槽位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Backup,
    Restore,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Backup => "backup",
            JobKind::Restore => "restore",
        }
    }
}

/// 当前任务状态快照，作为 sync_state 事件的负载发送给新接入的观察者
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub is_running: bool,
    #[serde(rename = "type")]
    pub kind: Option<JobKind>,
    pub logs: Vec<String>,
    pub command: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl JobSnapshot {
    /// 空闲且无历史日志的快照（进程启动时的初始状态）
    pub fn idle() -> Self {
        Self {
            is_running: false,
            kind: None,
            logs: Vec::new(),
            command: None,
            started_at: None,
        }
    }

    /// 是否有值得回放给新观察者的内容
    pub fn has_replayable_state(&self) -> bool {
        self.is_running || !self.logs.is_empty()
    }
}

/// 进度事件：观察任务状态的唯一合法途径，发出后不可变
///
/// 序列化后的 `type` 字段与前端协议一一对应，例如
/// `{"type":"backup_progress","message":"..."}`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    BackupStarted {
        #[serde(skip_serializing_if = "Option::is_none")]
        connection_id: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        schedule_id: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        schema: Option<String>,
    },
    BackupCommand {
        command: String,
    },
    BackupProgress {
        message: String,
    },
    BackupCompleted {
        file_path: String,
        file_size: i64,
    },
    BackupFailed {
        error: String,
    },
    RestoreStarted {
        backup_id: i64,
        target_connection_id: i64,
    },
    RestoreProgress {
        message: String,
    },
    RestoreCompleted {
        message: String,
    },
    RestoreFailed {
        error: String,
    },
    SyncState {
        state: JobSnapshot,
    },
}

impl ProgressEvent {
    /// 构造进度行事件
    pub fn progress(kind: JobKind, message: impl Into<String>) -> Self {
        match kind {
            JobKind::Backup => ProgressEvent::BackupProgress {
                message: message.into(),
            },
            JobKind::Restore => ProgressEvent::RestoreProgress {
                message: message.into(),
            },
        }
    }

    /// 构造失败事件
    pub fn failed(kind: JobKind, error: impl Into<String>) -> Self {
        match kind {
            JobKind::Backup => ProgressEvent::BackupFailed {
                error: error.into(),
            },
            JobKind::Restore => ProgressEvent::RestoreFailed {
                error: error.into(),
            },
        }
    }

    /// 事件所属的任务种类（sync_state 不属于任何任务）
    pub fn kind(&self) -> Option<JobKind> {
        match self {
            ProgressEvent::BackupStarted { .. }
            | ProgressEvent::BackupCommand { .. }
            | ProgressEvent::BackupProgress { .. }
            | ProgressEvent::BackupCompleted { .. }
            | ProgressEvent::BackupFailed { .. } => Some(JobKind::Backup),
            ProgressEvent::RestoreStarted { .. }
            | ProgressEvent::RestoreProgress { .. }
            | ProgressEvent::RestoreCompleted { .. }
            | ProgressEvent::RestoreFailed { .. } => Some(JobKind::Restore),
            ProgressEvent::SyncState { .. } => None,
        }
    }

    /// 是否为起始事件
    pub fn is_started(&self) -> bool {
        matches!(
            self,
            ProgressEvent::BackupStarted { .. } | ProgressEvent::RestoreStarted { .. }
        )
    }

    /// 是否为终止事件（每个任务恰好发出一个）
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::BackupCompleted { .. }
                | ProgressEvent::BackupFailed { .. }
                | ProgressEvent::RestoreCompleted { .. }
                | ProgressEvent::RestoreFailed { .. }
        )
    }

    /// 进度行内容（仅 progress 类事件）
    pub fn progress_message(&self) -> Option<&str> {
        match self {
            ProgressEvent::BackupProgress { message }
            | ProgressEvent::RestoreProgress { message } => Some(message),
            _ => None,
        }
    }
}
