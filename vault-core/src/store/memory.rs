use crate::{Result, VaultError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::models::{
    BackupRecord, BackupStatus, ConnectionPatch, ConnectionTarget, NewBackupRecord,
    NewRestoreRecord, RestoreRecord, ScheduleConfig,
};
use super::ConfigStore;

/// 内存配置存储
///
/// 测试与 CLI 单机运行使用；持久化存储由外部系统提供，
/// 通过 ConfigStore 接口接入。
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    connections: HashMap<i64, ConnectionTarget>,
    schedules: Vec<ScheduleConfig>,
    backups: Vec<BackupRecord>,
    restores: Vec<RestoreRecord>,
    next_backup_id: i64,
    next_restore_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 写入连接（测试/CLI 装配用）
    pub fn insert_connection(&self, connection: ConnectionTarget) {
        let mut inner = self.lock();
        inner.connections.insert(connection.id, connection);
    }

    /// 写入定时配置（测试/CLI 装配用）
    pub fn insert_schedule(&self, schedule: ScheduleConfig) {
        self.lock().schedules.push(schedule);
    }

    /// 预置一条备份历史并指定创建时间（测试保留策略排序用）
    pub fn insert_backup_at(
        &self,
        record: NewBackupRecord,
        created_at: chrono::DateTime<Utc>,
    ) -> i64 {
        let mut inner = self.lock();
        inner.next_backup_id += 1;
        let id = inner.next_backup_id;
        inner.backups.push(BackupRecord {
            id,
            schedule_id: record.schedule_id,
            connection_id: record.connection_id,
            schema: record.schema,
            file_path: record.file_path,
            file_size: record.file_size,
            status: record.status,
            error_message: record.error_message,
            created_at,
        });
        id
    }

    /// 当前全部备份记录（测试断言用）
    pub fn all_backups(&self) -> Vec<BackupRecord> {
        self.lock().backups.clone()
    }

    /// 当前全部恢复记录（测试断言用）
    pub fn all_restores(&self) -> Vec<RestoreRecord> {
        self.lock().restores.clone()
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get_connection(&self, id: i64) -> Result<Option<ConnectionTarget>> {
        let inner = self.lock();
        Ok(inner.connections.get(&id).cloned())
    }

    async fn update_connection(&self, id: i64, patch: ConnectionPatch) -> Result<()> {
        let mut inner = self.lock();
        let connection = inner
            .connections
            .get_mut(&id)
            .ok_or_else(|| VaultError::store(format!("连接不存在: {id}")))?;

        if let Some(container_id) = patch.container_id {
            connection.container_id = Some(container_id);
        }
        if let Some(container_name) = patch.container_name {
            connection.container_name = Some(container_name);
        }
        Ok(())
    }

    async fn add_backup_history(&self, record: NewBackupRecord) -> Result<i64> {
        let mut inner = self.lock();
        inner.next_backup_id += 1;
        let id = inner.next_backup_id;
        inner.backups.push(BackupRecord {
            id,
            schedule_id: record.schedule_id,
            connection_id: record.connection_id,
            schema: record.schema,
            file_path: record.file_path,
            file_size: record.file_size,
            status: record.status,
            error_message: record.error_message,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn get_backup(&self, id: i64) -> Result<Option<BackupRecord>> {
        let inner = self.lock();
        Ok(inner.backups.iter().find(|b| b.id == id).cloned())
    }

    async fn get_backup_history_by_schedule(&self, schedule_id: i64) -> Result<Vec<BackupRecord>> {
        let inner = self.lock();
        let mut records: Vec<BackupRecord> = inner
            .backups
            .iter()
            .filter(|b| b.schedule_id == Some(schedule_id))
            .cloned()
            .collect();
        // 从新到旧，创建时间相同时按ID倒序
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(records)
    }

    async fn delete_backup_record(&self, id: i64) -> Result<()> {
        let mut inner = self.lock();
        inner.backups.retain(|b| b.id != id);
        Ok(())
    }

    async fn get_schedule_configs(&self) -> Result<Vec<ScheduleConfig>> {
        let inner = self.lock();
        Ok(inner.schedules.clone())
    }

    async fn add_restore_history(&self, record: NewRestoreRecord) -> Result<i64> {
        let mut inner = self.lock();
        inner.next_restore_id += 1;
        let id = inner.next_restore_id;
        inner.restores.push(RestoreRecord {
            id,
            backup_id: record.backup_id,
            target_connection_id: record.target_connection_id,
            status: record.status,
            error_message: record.error_message,
            created_at: Utc::now(),
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(schedule_id: Option<i64>) -> NewBackupRecord {
        NewBackupRecord {
            schedule_id,
            connection_id: Some(1),
            schema: "public".to_string(),
            file_path: "/backups/a.dump".to_string(),
            file_size: Some(128),
            status: BackupStatus::Completed,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let store = MemoryStore::new();
        let base = Utc::now();

        let oldest = store.insert_backup_at(record(Some(7)), base - Duration::hours(3));
        let newest = store.insert_backup_at(record(Some(7)), base);
        let middle = store.insert_backup_at(record(Some(7)), base - Duration::hours(1));
        // 其他定时配置的记录不应出现
        store.insert_backup_at(record(Some(8)), base);

        let history = store.get_backup_history_by_schedule(7).await.unwrap();
        let ids: Vec<i64> = history.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![newest, middle, oldest]);
    }

    #[tokio::test]
    async fn test_update_connection_patch() {
        let store = MemoryStore::new();
        store.insert_connection(ConnectionTarget {
            id: 1,
            name: "app-db".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            database: "app".to_string(),
            username: "postgres".to_string(),
            password: None,
            is_docker: true,
            container_id: Some("deadbeef".to_string()),
            container_name: None,
        });

        store
            .update_connection(
                1,
                ConnectionPatch {
                    container_id: Some("cafebabe".to_string()),
                    container_name: Some("app-db".to_string()),
                },
            )
            .await
            .unwrap();

        let connection = store.get_connection(1).await.unwrap().unwrap();
        assert_eq!(connection.container_id.as_deref(), Some("cafebabe"));
        assert_eq!(connection.container_name.as_deref(), Some("app-db"));
    }
}
