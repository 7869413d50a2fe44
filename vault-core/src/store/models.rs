use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 备份目标连接（由外部配置存储拥有，这里只读消费）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub id: i64,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: Option<String>,
    pub is_docker: bool,
    pub container_id: Option<String>,
    pub container_name: Option<String>,
}

impl ConnectionTarget {
    /// 自愈解析时用于按名称查找容器的逻辑名称
    /// 优先使用记录的容器名，缺失时回退到连接名
    pub fn logical_container_name(&self) -> &str {
        self.container_name.as_deref().unwrap_or(&self.name)
    }
}

/// 连接记录的部分更新（自愈解析成功后回写新的容器标识）
#[derive(Debug, Clone, Default)]
pub struct ConnectionPatch {
    pub container_id: Option<String>,
    pub container_name: Option<String>,
}

/// 备份文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupFormat {
    /// pg_dump 自定义格式（pg_restore 恢复）
    Custom,
    /// 纯 SQL 文本（psql 恢复）
    Plain,
}

impl BackupFormat {
    /// pg_dump 的 -F 参数值
    pub fn pg_dump_flag(&self) -> &'static str {
        match self {
            BackupFormat::Custom => "c",
            BackupFormat::Plain => "p",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            BackupFormat::Custom => "dump",
            BackupFormat::Plain => "sql",
        }
    }

    /// 根据备份文件扩展名推断格式（恢复时使用）
    pub fn from_file_path(path: &str) -> Self {
        if path.ends_with(".sql") {
            BackupFormat::Plain
        } else {
            BackupFormat::Custom
        }
    }
}

/// 定时备份配置（由外部配置存储拥有，每次 reload 时重新读取）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub id: i64,
    pub name: String,
    pub connection_id: i64,
    pub schema: String,
    pub cron_expression: Option<String>,
    pub retention_count: Option<u32>,
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub excluded_tables: Vec<String>,
    #[serde(default)]
    pub excluded_data_tables: Vec<String>,
    pub format: BackupFormat,
}

/// 备份状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        }
    }
}

/// 备份历史记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: i64,
    pub schedule_id: Option<i64>,
    pub connection_id: Option<i64>,
    pub schema: String,
    pub file_path: String,
    pub file_size: Option<i64>,
    pub status: BackupStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 新备份历史记录（id 与 created_at 由存储分配）
#[derive(Debug, Clone)]
pub struct NewBackupRecord {
    pub schedule_id: Option<i64>,
    pub connection_id: Option<i64>,
    pub schema: String,
    pub file_path: String,
    pub file_size: Option<i64>,
    pub status: BackupStatus,
    pub error_message: Option<String>,
}

/// 恢复历史记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreRecord {
    pub id: i64,
    pub backup_id: i64,
    pub target_connection_id: i64,
    pub status: BackupStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 新恢复历史记录
#[derive(Debug, Clone)]
pub struct NewRestoreRecord {
    pub backup_id: i64,
    pub target_connection_id: i64,
    pub status: BackupStatus,
    pub error_message: Option<String>,
}
