// 配置存储模块
//
// 连接、定时配置与备份历史由外部配置存储拥有，这里只定义
// 窄接口供编排层使用。MemoryStore 提供内存实现，供测试与
// CLI 单机运行使用。

mod memory;
mod models;

use crate::Result;
use async_trait::async_trait;

pub use memory::MemoryStore;
pub use models::{
    BackupFormat, BackupRecord, BackupStatus, ConnectionPatch, ConnectionTarget, NewBackupRecord,
    NewRestoreRecord, RestoreRecord, ScheduleConfig,
};

/// 外部配置存储的窄接口
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// 按ID获取连接
    async fn get_connection(&self, id: i64) -> Result<Option<ConnectionTarget>>;

    /// 部分更新连接记录（自愈解析回写容器标识）
    async fn update_connection(&self, id: i64, patch: ConnectionPatch) -> Result<()>;

    /// 写入备份历史，返回新记录ID
    async fn add_backup_history(&self, record: NewBackupRecord) -> Result<i64>;

    /// 按ID获取备份记录
    async fn get_backup(&self, id: i64) -> Result<Option<BackupRecord>>;

    /// 获取指定定时配置的备份历史，按创建时间从新到旧排序
    async fn get_backup_history_by_schedule(&self, schedule_id: i64) -> Result<Vec<BackupRecord>>;

    /// 删除备份记录
    async fn delete_backup_record(&self, id: i64) -> Result<()>;

    /// 获取全部定时备份配置
    async fn get_schedule_configs(&self) -> Result<Vec<ScheduleConfig>>;

    /// 写入恢复历史，返回新记录ID
    async fn add_restore_history(&self, record: NewRestoreRecord) -> Result<i64>;
}
