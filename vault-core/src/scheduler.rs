use crate::backup::BackupOptions;
use crate::constants::webhook;
use crate::job::JobCoordinator;
use crate::store::{BackupRecord, BackupStatus, ConfigStore, ScheduleConfig};
use crate::{Result, VaultError};
use chrono::Utc;
use cron::Schedule;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// 定时备份调度器
///
/// 每个带 cron 表达式的定时配置对应一个计时器任务。reload 在同
/// 一把异步互斥锁里"全部停掉再全部重建"，两个并发的 reload 触发
/// （比如接连两次配置编辑）不会留下重复或孤儿计时器。
pub struct Scheduler {
    coordinator: Arc<JobCoordinator>,
    store: Arc<dyn ConfigStore>,
    http: reqwest::Client,
    tasks: tokio::sync::Mutex<HashMap<i64, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(coordinator: Arc<JobCoordinator>, store: Arc<dyn ConfigStore>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(webhook::REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            coordinator,
            store,
            http,
            tasks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// 重新加载全部定时任务（配置增删改后调用）
    pub async fn reload(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;

        // 先停掉现有计时器
        for (_, handle) in tasks.drain() {
            handle.abort();
        }

        let configs = self.store.get_schedule_configs().await?;
        let scheduled: Vec<ScheduleConfig> = configs
            .into_iter()
            .filter(|c| c.cron_expression.is_some())
            .collect();

        tracing::info!("📅 发现 {} 个定时备份配置", scheduled.len());

        for config in scheduled {
            let Some(expression) = config.cron_expression.clone() else {
                continue;
            };

            let schedule = match parse_cron(&expression) {
                Ok(schedule) => schedule,
                Err(e) => {
                    tracing::error!(schedule = %config.name, "❌ 无效的 cron 表达式: {}", e);
                    continue;
                }
            };

            tracing::info!(schedule = %config.name, expression = %expression, "📅 注册定时备份");

            let schedule_id = config.id;
            let handle = tokio::spawn(run_schedule_loop(
                schedule,
                config,
                Arc::clone(&self.coordinator),
                Arc::clone(&self.store),
                self.http.clone(),
            ));
            tasks.insert(schedule_id, handle);
        }

        Ok(())
    }

    /// 停止全部计时器
    pub async fn stop_all(&self) {
        let mut tasks = self.tasks.lock().await;
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }

    /// 当前活跃的计时器数量
    pub async fn active_timer_count(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.try_lock() {
            for (_, handle) in tasks.drain() {
                handle.abort();
            }
        }
    }
}

/// 解析 cron 表达式；经典5段表达式自动补秒位
pub(crate) fn parse_cron(expression: &str) -> Result<Schedule> {
    let normalized = normalize_cron(expression);
    Schedule::from_str(&normalized).map_err(|e| VaultError::Cron(format!("{expression}: {e}")))
}

/// node-cron 风格的5段表达式补上秒位，6/7段原样返回
pub(crate) fn normalize_cron(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// 单个定时配置的计时循环：睡到下一个触发点，执行，再睡
async fn run_schedule_loop(
    schedule: Schedule,
    config: ScheduleConfig,
    coordinator: Arc<JobCoordinator>,
    store: Arc<dyn ConfigStore>,
    http: reqwest::Client,
) {
    loop {
        let now = Utc::now();
        let Some(next) = schedule.after(&now).next() else {
            tracing::warn!(schedule = %config.name, "cron 表达式没有未来触发点，计时器退出");
            return;
        };

        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;

        run_scheduled_backup(&config, &coordinator, &store, &http).await;
    }
}

/// 执行一次定时备份，并处理保留策略与 webhook 通知
async fn run_scheduled_backup(
    config: &ScheduleConfig,
    coordinator: &Arc<JobCoordinator>,
    store: &Arc<dyn ConfigStore>,
    http: &reqwest::Client,
) {
    tracing::info!(schedule = %config.name, "⏰ 触发定时备份");

    match coordinator
        .start_backup(BackupOptions::from_schedule(config))
        .await
    {
        Ok(outcome) => {
            tracing::info!(
                schedule = %config.name,
                "✅ 定时备份完成: {}",
                outcome.file_path.display()
            );

            if let Some(url) = &config.webhook_url {
                send_webhook(
                    http,
                    url,
                    json!({
                        "event": "backup_success",
                        "task": config.name,
                        "file": outcome.file_path.display().to_string(),
                        "size": outcome.file_size,
                        "timestamp": Utc::now().to_rfc3339(),
                    }),
                )
                .await;
            }

            if let Some(retention) = config.retention_count {
                if retention > 0 {
                    enforce_retention(store, config, retention).await;
                }
            }
        }
        Err(VaultError::JobAlreadyRunning) => {
            // 已有任务在执行：本次跳过，不重试，等下一个周期
            tracing::warn!(schedule = %config.name, "已有任务正在执行，跳过本次定时备份");
        }
        Err(e) => {
            tracing::error!(schedule = %config.name, "❌ 定时备份失败: {}", e);

            if let Some(url) = &config.webhook_url {
                send_webhook(
                    http,
                    url,
                    json!({
                        "event": "backup_failed",
                        "task": config.name,
                        "error": e.to_string(),
                        "timestamp": Utc::now().to_rfc3339(),
                    }),
                )
                .await;
            }
        }
    }
}

/// 保留策略：该定时配置下已完成的备份只保留最新 N 个
///
/// 只统计本定时配置产生的备份，手动备份不进入保留窗口。
/// 单个删除失败只记录，不影响其余删除，也不影响触发它的备份任务。
pub(crate) async fn enforce_retention(
    store: &Arc<dyn ConfigStore>,
    config: &ScheduleConfig,
    retention: u32,
) {
    let history = match store.get_backup_history_by_schedule(config.id).await {
        Ok(history) => history,
        Err(e) => {
            tracing::error!(schedule = %config.name, "读取备份历史失败: {}", e);
            return;
        }
    };

    let completed: Vec<BackupRecord> = history
        .into_iter()
        .filter(|b| b.status == BackupStatus::Completed)
        .collect();

    if completed.len() <= retention as usize {
        return;
    }

    // 历史已按从新到旧排序，保留前 N 个，其余全部删除
    let stale = &completed[retention as usize..];
    tracing::info!(
        schedule = %config.name,
        "🧹 保留策略：删除 {} 个过期备份",
        stale.len()
    );

    for backup in stale {
        match delete_backup_artifact(store, backup).await {
            Ok(()) => {
                tracing::info!(backup_id = backup.id, "已删除过期备份: {}", backup.file_path);
            }
            Err(e) => {
                tracing::error!(backup_id = backup.id, "删除过期备份失败: {}", e);
            }
        }
    }
}

async fn delete_backup_artifact(
    store: &Arc<dyn ConfigStore>,
    backup: &BackupRecord,
) -> Result<()> {
    let path = Path::new(&backup.file_path);
    if path.exists() {
        tokio::fs::remove_file(path).await?;
    }
    store.delete_backup_record(backup.id).await?;
    Ok(())
}

/// 尽力而为的 webhook 通知：失败只记录，不影响任务与保留结果
async fn send_webhook(http: &reqwest::Client, url: &str, payload: serde_json::Value) {
    match http.post(url).json(&payload).send().await {
        Ok(response) if !response.status().is_success() => {
            tracing::warn!(url, status = %response.status(), "⚠️ webhook 返回非成功状态");
        }
        Ok(_) => {
            tracing::debug!(url, "webhook 通知已发送");
        }
        Err(e) => {
            tracing::warn!(url, "⚠️ webhook 通知发送失败: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::store::{BackupFormat, MemoryStore, NewBackupRecord};
    use chrono::Duration as ChronoDuration;
    use tempfile::tempdir;

    fn schedule_config(id: i64, cron: Option<&str>) -> ScheduleConfig {
        ScheduleConfig {
            id,
            name: format!("schedule-{id}"),
            connection_id: 1,
            schema: "public".to_string(),
            cron_expression: cron.map(str::to_string),
            retention_count: None,
            webhook_url: None,
            excluded_tables: Vec::new(),
            excluded_data_tables: Vec::new(),
            format: BackupFormat::Custom,
        }
    }

    fn backup_record(
        store: &MemoryStore,
        schedule_id: i64,
        file_path: &str,
        status: BackupStatus,
        age_hours: i64,
    ) -> i64 {
        store.insert_backup_at(
            NewBackupRecord {
                schedule_id: Some(schedule_id),
                connection_id: Some(1),
                schema: "public".to_string(),
                file_path: file_path.to_string(),
                file_size: Some(1),
                status,
                error_message: None,
            },
            Utc::now() - ChronoDuration::hours(age_hours),
        )
    }

    #[test]
    fn test_normalize_cron_adds_seconds_field() {
        assert_eq!(normalize_cron("0 2 * * *"), "0 0 2 * * *");
        assert_eq!(normalize_cron("  */5 * * * *  "), "0 */5 * * * *");
        // 已带秒位的表达式原样返回
        assert_eq!(normalize_cron("30 0 2 * * *"), "30 0 2 * * *");
    }

    #[test]
    fn test_parse_cron_rejects_garbage() {
        assert!(parse_cron("0 2 * * *").is_ok());
        assert!(parse_cron("not a cron").is_err());
        assert!(parse_cron("99 99 * * *").is_err());
    }

    fn make_scheduler(store: Arc<MemoryStore>, dir: &std::path::Path) -> Scheduler {
        let mut config = AppConfig::default();
        config.backup.storage_dir = dir.to_string_lossy().to_string();
        let coordinator = Arc::new(JobCoordinator::new(
            &config,
            Arc::clone(&store) as Arc<dyn ConfigStore>,
        ));
        Scheduler::new(coordinator, store)
    }

    #[tokio::test]
    async fn test_reload_replaces_all_timers() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert_schedule(schedule_config(1, Some("0 2 * * *")));
        store.insert_schedule(schedule_config(2, Some("0 3 * * *")));
        // 无 cron 表达式与非法表达式都应被跳过
        store.insert_schedule(schedule_config(3, None));
        store.insert_schedule(schedule_config(4, Some("not a cron")));

        let scheduler = make_scheduler(Arc::clone(&store), dir.path());

        scheduler.reload().await.unwrap();
        assert_eq!(scheduler.active_timer_count().await, 2);

        // 再次 reload：替换而非累加
        store.insert_schedule(schedule_config(5, Some("0 4 * * *")));
        scheduler.reload().await.unwrap();
        assert_eq!(scheduler.active_timer_count().await, 3);

        scheduler.stop_all().await;
        assert_eq!(scheduler.active_timer_count().await, 0);
    }

    #[tokio::test]
    async fn test_retention_deletes_oldest_beyond_count() {
        let dir = tempdir().unwrap();
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let config = schedule_config(7, Some("0 2 * * *"));

        // 5个已完成备份（带真实文件）+ 1个失败记录
        let mut ids = Vec::new();
        for age in 0..5 {
            let file = dir.path().join(format!("b{age}.dump"));
            std::fs::write(&file, b"data").unwrap();
            ids.push(backup_record(
                &store,
                7,
                &file.to_string_lossy(),
                BackupStatus::Completed,
                age,
            ));
        }
        let failed_file = dir.path().join("failed.dump");
        backup_record(
            &store,
            7,
            &failed_file.to_string_lossy(),
            BackupStatus::Failed,
            1,
        );

        let store_dyn: Arc<dyn ConfigStore> = Arc::clone(&store) as Arc<dyn ConfigStore>;
        enforce_retention(&store_dyn, &config, 2).await;

        let remaining = store.get_backup_history_by_schedule(7).await.unwrap();
        let completed: Vec<_> = remaining
            .iter()
            .filter(|b| b.status == BackupStatus::Completed)
            .collect();
        assert_eq!(completed.len(), 2, "只保留最新2个已完成备份");
        // 最新的两个（age 0 和 1）保留
        assert_eq!(completed[0].id, ids[0]);
        assert_eq!(completed[1].id, ids[1]);

        // 被删除的旧备份文件也不在了
        for age in 2..5 {
            assert!(!dir.path().join(format!("b{age}.dump")).exists());
        }
        assert!(dir.path().join("b0.dump").exists());
        assert!(dir.path().join("b1.dump").exists());
    }

    #[tokio::test]
    async fn test_retention_single_failure_does_not_abort_rest() {
        let dir = tempdir().unwrap();
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let config = schedule_config(7, None);

        // 最新的在前面；中间一个记录的"文件"是目录，remove_file 必然失败
        let keep = dir.path().join("keep.dump");
        std::fs::write(&keep, b"data").unwrap();
        backup_record(&store, 7, &keep.to_string_lossy(), BackupStatus::Completed, 0);

        let bad_dir = dir.path().join("not-a-file.dump");
        std::fs::create_dir(&bad_dir).unwrap();
        let bad_id = backup_record(
            &store,
            7,
            &bad_dir.to_string_lossy(),
            BackupStatus::Completed,
            1,
        );

        let old = dir.path().join("old.dump");
        std::fs::write(&old, b"data").unwrap();
        let old_id = backup_record(&store, 7, &old.to_string_lossy(), BackupStatus::Completed, 2);

        let store_dyn: Arc<dyn ConfigStore> = Arc::clone(&store) as Arc<dyn ConfigStore>;
        enforce_retention(&store_dyn, &config, 1).await;

        let remaining = store.get_backup_history_by_schedule(7).await.unwrap();
        let ids: Vec<i64> = remaining.iter().map(|b| b.id).collect();
        // 坏记录删除失败但仍保留在历史里；更旧的记录照常删除
        assert!(ids.contains(&bad_id));
        assert!(!ids.contains(&old_id));
        assert!(!old.exists());
        assert!(keep.exists());
    }
}
