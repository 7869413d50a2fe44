use crate::backup::{BackupOptions, backup_file_name, build_pg_dump_command};
use crate::config::AppConfig;
use crate::constants::{docker as docker_constants, progress as progress_constants};
use crate::docker::{ContainerExecutor, Resolution};
use crate::events::{JobKind, JobSnapshot, ProgressEvent};
use crate::process::ProcessRunner;
use crate::progress::{ProgressChannel, ProgressObserver};
use crate::restore::{build_restore_command, friendly_progress};
use crate::store::{
    BackupStatus, ConfigStore, ConnectionPatch, ConnectionTarget, NewBackupRecord,
    NewRestoreRecord,
};
use crate::{Result, VaultError};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// 全局唯一的任务状态
///
/// 运行标志是整个进程的并发闸门：备份与恢复共用同一个槽位，
/// 获取必须走原子的 compare-exchange，不允许先查后设两步走。
/// 日志缓冲、命令行等记录供中途接入的观察者回放。
pub struct JobState {
    running: AtomicBool,
    log_capacity: usize,
    record: Mutex<JobRecord>,
}

#[derive(Default)]
struct JobRecord {
    kind: Option<JobKind>,
    command: Option<String>,
    logs: VecDeque<String>,
    started_at: Option<DateTime<Utc>>,
}

impl JobState {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            running: AtomicBool::new(false),
            log_capacity,
            record: Mutex::new(JobRecord::default()),
        }
    }

    fn lock_record(&self) -> MutexGuard<'_, JobRecord> {
        self.record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 原子地尝试占用任务槽位；成功后重置任务记录
    ///
    /// 返回 false 表示已有任务在运行，调用方必须立即失败，
    /// 不阻塞也不排队。
    pub fn try_acquire(&self, kind: JobKind) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let mut record = self.lock_record();
        record.kind = Some(kind);
        record.command = None;
        record.logs.clear();
        record.started_at = Some(Utc::now());
        true
    }

    /// 释放任务槽位（任务记录保留，供事后接入的观察者回放）
    pub fn release(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 根据事件维护可回放状态
    ///
    /// started 置位运行标志并清空缓冲；command 记录命令行；
    /// progress 追加日志（超容量丢最旧）；终止事件清掉运行标志
    /// 但保留缓冲，任务刚结束时接入的观察者仍能看到结果。
    pub fn apply(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::BackupStarted { .. } | ProgressEvent::RestoreStarted { .. } => {
                self.running.store(true, Ordering::Release);
                let mut record = self.lock_record();
                record.kind = event.kind();
                record.logs.clear();
            }
            ProgressEvent::BackupCommand { command } => {
                self.lock_record().command = Some(command.clone());
            }
            ProgressEvent::BackupProgress { message }
            | ProgressEvent::RestoreProgress { message } => {
                let mut record = self.lock_record();
                record.logs.push_back(message.clone());
                while record.logs.len() > self.log_capacity {
                    record.logs.pop_front();
                }
            }
            ProgressEvent::BackupCompleted { .. }
            | ProgressEvent::BackupFailed { .. }
            | ProgressEvent::RestoreCompleted { .. }
            | ProgressEvent::RestoreFailed { .. } => {
                self.running.store(false, Ordering::Release);
            }
            ProgressEvent::SyncState { .. } => {}
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let record = self.lock_record();
        JobSnapshot {
            is_running: self.is_running(),
            kind: record.kind,
            logs: record.logs.iter().cloned().collect(),
            command: record.command.clone(),
            started_at: record.started_at,
        }
    }
}

/// 槽位归还守卫：任何退出路径（包括历史写入失败）都回到 Idle，
/// 下游存储故障绝不能让任务槽位永久占用
struct JobGuard {
    state: Arc<JobState>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.state.release();
    }
}

/// 备份任务结果
#[derive(Debug)]
pub struct BackupOutcome {
    /// 历史记录ID（历史写入失败时为 None，任务本身仍算成功）
    pub backup_id: Option<i64>,
    pub file_path: PathBuf,
    pub file_size: i64,
}

/// 任务协调器
///
/// 持有唯一的任务状态，负责把备份/恢复执行包装成
/// started → progress* → completed|failed 的事件序列。
pub struct JobCoordinator {
    state: Arc<JobState>,
    progress: ProgressChannel,
    store: Arc<dyn ConfigStore>,
    runner: ProcessRunner,
    docker: ContainerExecutor,
    backup_dir: PathBuf,
}

impl JobCoordinator {
    pub fn new(config: &AppConfig, store: Arc<dyn ConfigStore>) -> Self {
        let state = Arc::new(JobState::new(config.progress.log_history));
        let progress = ProgressChannel::new(Arc::clone(&state));

        Self {
            state,
            progress,
            store,
            runner: ProcessRunner::new(),
            docker: ContainerExecutor::new(config.get_docker_socket()),
            backup_dir: config.get_backup_dir(),
        }
    }

    pub fn progress(&self) -> &ProgressChannel {
        &self.progress
    }

    /// 接入一个进度观察者
    pub fn subscribe(&self) -> ProgressObserver {
        self.progress.subscribe()
    }

    /// 当前任务状态快照
    pub fn job_state(&self) -> JobSnapshot {
        self.state.snapshot()
    }

    /// 启动备份任务
    ///
    /// 已有任务运行时立即返回 JobAlreadyRunning（不排队）。
    pub async fn start_backup(&self, options: BackupOptions) -> Result<BackupOutcome> {
        if !self.state.try_acquire(JobKind::Backup) {
            return Err(VaultError::JobAlreadyRunning);
        }
        let _guard = JobGuard {
            state: Arc::clone(&self.state),
        };

        self.progress.publish(ProgressEvent::BackupStarted {
            connection_id: Some(options.connection_id),
            schedule_id: options.schedule_id,
            schema: Some(options.schema.clone()),
        });

        let mut planned_file: Option<PathBuf> = None;
        match self.run_backup(&options, &mut planned_file).await {
            Ok((file_path, file_size)) => {
                self.progress.publish(ProgressEvent::BackupCompleted {
                    file_path: file_path.display().to_string(),
                    file_size,
                });

                let backup_id = match self
                    .store
                    .add_backup_history(NewBackupRecord {
                        schedule_id: options.schedule_id,
                        connection_id: Some(options.connection_id),
                        schema: options.schema.clone(),
                        file_path: file_path.display().to_string(),
                        file_size: Some(file_size),
                        status: BackupStatus::Completed,
                        error_message: None,
                    })
                    .await
                {
                    Ok(id) => Some(id),
                    Err(e) => {
                        // 备份文件已落盘，历史写入失败只降级不报错
                        tracing::warn!("备份成功但历史写入失败: {}", e);
                        None
                    }
                };

                Ok(BackupOutcome {
                    backup_id,
                    file_path,
                    file_size,
                })
            }
            Err(e) => {
                self.progress
                    .publish(ProgressEvent::failed(JobKind::Backup, e.to_string()));

                if let Some(file_path) = planned_file {
                    if let Err(store_err) = self
                        .store
                        .add_backup_history(NewBackupRecord {
                            schedule_id: options.schedule_id,
                            connection_id: Some(options.connection_id),
                            schema: options.schema.clone(),
                            file_path: file_path.display().to_string(),
                            file_size: None,
                            status: BackupStatus::Failed,
                            error_message: Some(e.to_string()),
                        })
                        .await
                    {
                        tracing::warn!("失败历史写入失败: {}", store_err);
                    }
                }
                Err(e)
            }
        }
    }

    /// 启动恢复任务
    pub async fn start_restore(&self, backup_id: i64, target_connection_id: i64) -> Result<()> {
        if !self.state.try_acquire(JobKind::Restore) {
            return Err(VaultError::JobAlreadyRunning);
        }
        let _guard = JobGuard {
            state: Arc::clone(&self.state),
        };

        self.progress.publish(ProgressEvent::RestoreStarted {
            backup_id,
            target_connection_id,
        });

        let result = self.run_restore(backup_id, target_connection_id).await;
        let status = match &result {
            Ok(message) => {
                self.progress.publish(ProgressEvent::RestoreCompleted {
                    message: message.clone(),
                });
                (BackupStatus::Completed, None)
            }
            Err(e) => {
                self.progress
                    .publish(ProgressEvent::failed(JobKind::Restore, e.to_string()));
                (BackupStatus::Failed, Some(e.to_string()))
            }
        };

        if let Err(store_err) = self
            .store
            .add_restore_history(NewRestoreRecord {
                backup_id,
                target_connection_id,
                status: status.0,
                error_message: status.1,
            })
            .await
        {
            tracing::warn!("恢复历史写入失败: {}", store_err);
        }

        result.map(|_| ())
    }

    async fn run_backup(
        &self,
        options: &BackupOptions,
        planned_file: &mut Option<PathBuf>,
    ) -> Result<(PathBuf, i64)> {
        let connection = self
            .store
            .get_connection(options.connection_id)
            .await?
            .ok_or_else(|| {
                VaultError::backup(format!("连接不存在: {}", options.connection_id))
            })?;

        tokio::fs::create_dir_all(&self.backup_dir).await?;
        let file_name = backup_file_name(&connection.database, &options.schema, options.format);
        let local_path = self.backup_dir.join(&file_name);
        *planned_file = Some(local_path.clone());

        if connection.is_docker {
            self.run_container_backup(&connection, options, &file_name, &local_path)
                .await?;
        } else {
            self.run_local_backup(&connection, options, &local_path)
                .await?;
        }

        let file_size = tokio::fs::metadata(&local_path).await?.len() as i64;
        Ok((local_path, file_size))
    }

    /// 通过主机网络直连执行 pg_dump
    async fn run_local_backup(
        &self,
        connection: &ConnectionTarget,
        options: &BackupOptions,
        local_path: &Path,
    ) -> Result<()> {
        let command = build_pg_dump_command(
            connection,
            options,
            &local_path.to_string_lossy(),
            true,
        );
        // 命令行先于执行发出，观察者能看到将要运行什么
        self.progress.publish(ProgressEvent::BackupCommand {
            command: command.rendered(),
        });

        let (line_tx, relay) = self.spawn_progress_relay(JobKind::Backup, passthrough);
        let run_result = self.runner.run(&command, line_tx).await;
        finish_relay(relay).await;
        run_result?;
        Ok(())
    }

    /// 在容器内执行 pg_dump，产物复制回本地
    async fn run_container_backup(
        &self,
        connection: &ConnectionTarget,
        options: &BackupOptions,
        file_name: &str,
        local_path: &Path,
    ) -> Result<()> {
        let resolution = self.resolve_and_heal(connection, JobKind::Backup).await?;

        let staging_path = format!(
            "{}/{file_name}",
            docker_constants::CONTAINER_STAGING_DIR
        );
        let command = build_pg_dump_command(connection, options, &staging_path, false);
        self.progress.publish(ProgressEvent::BackupCommand {
            command: command.rendered(),
        });

        let (line_tx, relay) = self.spawn_progress_relay(JobKind::Backup, passthrough);
        let exec_result = self
            .docker
            .exec(&resolution.id, &command.to_argv(), line_tx)
            .await;
        finish_relay(relay).await;

        let outcome = exec_result?;
        if outcome.exit_code != 0 {
            return Err(VaultError::ProcessFailed {
                program: command.program.clone(),
                code: outcome.exit_code as i32,
                output: outcome.output,
            });
        }

        self.docker
            .copy_file_from_container(&resolution.id, &staging_path, local_path)
            .await?;
        self.cleanup_staging_file(&resolution.id, &staging_path).await;
        Ok(())
    }

    async fn run_restore(&self, backup_id: i64, target_connection_id: i64) -> Result<String> {
        let backup = self
            .store
            .get_backup(backup_id)
            .await?
            .ok_or_else(|| VaultError::restore(format!("备份记录不存在: {backup_id}")))?;

        if !Path::new(&backup.file_path).exists() {
            return Err(VaultError::restore(format!(
                "备份文件不存在: {}",
                backup.file_path
            )));
        }

        let connection = self
            .store
            .get_connection(target_connection_id)
            .await?
            .ok_or_else(|| {
                VaultError::restore(format!("目标连接不存在: {target_connection_id}"))
            })?;

        if connection.is_docker {
            self.run_container_restore(&connection, &backup.file_path)
                .await?;
            Ok("Restore to Docker container completed successfully".to_string())
        } else {
            self.run_local_restore(&connection, &backup.file_path).await?;
            Ok("Restore completed successfully".to_string())
        }
    }

    async fn run_local_restore(
        &self,
        connection: &ConnectionTarget,
        backup_path: &str,
    ) -> Result<()> {
        let command = build_restore_command(connection, backup_path, true);

        let (line_tx, relay) = self.spawn_progress_relay(JobKind::Restore, friendly_progress);
        let run_result = self.runner.run(&command, line_tx).await;
        finish_relay(relay).await;
        run_result?;
        Ok(())
    }

    async fn run_container_restore(
        &self,
        connection: &ConnectionTarget,
        backup_path: &str,
    ) -> Result<()> {
        let resolution = self.resolve_and_heal(connection, JobKind::Restore).await?;

        let file_name = Path::new(backup_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| VaultError::restore(format!("备份路径无文件名: {backup_path}")))?;
        let staging_path = format!(
            "{}/{file_name}",
            docker_constants::CONTAINER_STAGING_DIR
        );

        self.progress.publish(ProgressEvent::progress(
            JobKind::Restore,
            "Copying backup file to container...",
        ));

        // 复制失败必须在任何远端恢复命令执行之前中止
        self.docker
            .copy_file_to_container(&resolution.id, Path::new(backup_path), &staging_path)
            .await?;

        self.progress.publish(ProgressEvent::progress(
            JobKind::Restore,
            "File copied. Starting restore...",
        ));

        let command = build_restore_command(connection, &staging_path, false);
        let (line_tx, relay) = self.spawn_progress_relay(JobKind::Restore, friendly_progress);
        let exec_result = self
            .docker
            .exec(&resolution.id, &command.to_argv(), line_tx)
            .await;
        finish_relay(relay).await;

        let outcome = exec_result?;
        if outcome.exit_code != 0 {
            return Err(VaultError::ProcessFailed {
                program: command.program.clone(),
                code: outcome.exit_code as i32,
                output: outcome.output,
            });
        }

        self.cleanup_staging_file(&resolution.id, &staging_path).await;
        Ok(())
    }

    /// 解析容器标识；经过自愈时把新ID回写连接记录，
    /// 下次操作直接验证通过，不再重复按名称查找
    async fn resolve_and_heal(
        &self,
        connection: &ConnectionTarget,
        kind: JobKind,
    ) -> Result<Resolution> {
        let logical_name = connection.logical_container_name().to_string();
        let resolution = self
            .docker
            .resolve_container(connection.container_id.as_deref(), &logical_name)
            .await?;

        if resolution.healed {
            if let Err(e) = self
                .store
                .update_connection(
                    connection.id,
                    ConnectionPatch {
                        container_id: Some(resolution.id.clone()),
                        container_name: Some(logical_name.clone()),
                    },
                )
                .await
            {
                tracing::warn!(connection_id = connection.id, "回写容器ID失败: {}", e);
            }

            self.progress.publish(ProgressEvent::progress(
                kind,
                format!(
                    "⚠️ Container ID changed. Updated connection to use new container: {logical_name}"
                ),
            ));
        }

        Ok(resolution)
    }

    /// 清理容器内暂存文件（尽力而为，失败只记录）
    async fn cleanup_staging_file(&self, container_id: &str, staging_path: &str) {
        let argv = vec!["rm".to_string(), staging_path.to_string()];
        // 输出不需要转发；接收端先关闭，发送立即失败而不会阻塞
        let (discard_tx, discard_rx) = mpsc::channel(1);
        drop(discard_rx);
        if let Err(e) = self.docker.exec(container_id, &argv, discard_tx).await {
            tracing::warn!(staging_path, "清理容器内暂存文件失败: {}", e);
        }
    }

    /// 输出行中继：子进程/容器的行事件转成 progress 事件广播
    fn spawn_progress_relay(
        &self,
        kind: JobKind,
        map: fn(&str) -> String,
    ) -> (mpsc::Sender<String>, JoinHandle<()>) {
        let (line_tx, mut line_rx) =
            mpsc::channel::<String>(progress_constants::LINE_CHANNEL_CAPACITY);
        let progress = self.progress.clone();

        let handle = tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                progress.publish(ProgressEvent::progress(kind, map(&line)));
            }
        });

        (line_tx, handle)
    }
}

fn passthrough(line: &str) -> String {
    line.to_string()
}

/// 等中继任务把已有的行全部发完，保证 progress 事件先于终止事件
async fn finish_relay(relay: JoinHandle<()>) {
    if let Err(e) = relay.await {
        tracing::warn!("进度中继任务异常退出: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackupConfig, DockerConfig, ProgressConfig};
    use crate::store::MemoryStore;
    use tempfile::tempdir;

    fn test_config(backup_dir: &Path) -> AppConfig {
        AppConfig {
            backup: BackupConfig {
                storage_dir: backup_dir.to_string_lossy().to_string(),
            },
            docker: DockerConfig {
                socket_path: "/var/run/docker.sock".to_string(),
            },
            progress: ProgressConfig { log_history: 100 },
        }
    }

    fn unreachable_connection() -> ConnectionTarget {
        ConnectionTarget {
            id: 1,
            name: "app-db".to_string(),
            host: "127.0.0.1".to_string(),
            // 不太可能有监听者的端口：pg_dump 要么缺失要么连接失败
            port: 59999,
            database: "app".to_string(),
            username: "postgres".to_string(),
            password: Some("sup3rs3cret".to_string()),
            is_docker: false,
            container_id: None,
            container_name: None,
        }
    }

    #[tokio::test]
    async fn test_try_acquire_is_exclusive_under_contention() {
        let state = Arc::new(JobState::new(10));
        let mut handles = Vec::new();

        for _ in 0..32 {
            let state = Arc::clone(&state);
            handles.push(tokio::spawn(async move {
                state.try_acquire(JobKind::Backup)
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1, "并发竞争下只允许一个任务获得槽位");
    }

    #[tokio::test]
    async fn test_backup_and_restore_share_one_slot() {
        let state = JobState::new(10);
        assert!(state.try_acquire(JobKind::Backup));
        // 恢复与备份互斥，不是按类型各一个槽位
        assert!(!state.try_acquire(JobKind::Restore));
        state.release();
        assert!(state.try_acquire(JobKind::Restore));
    }

    #[tokio::test]
    async fn test_log_buffer_evicts_oldest() {
        let state = JobState::new(3);
        assert!(state.try_acquire(JobKind::Backup));

        for i in 1..=5 {
            state.apply(&ProgressEvent::progress(JobKind::Backup, format!("行{i}")));
        }

        let snapshot = state.snapshot();
        assert_eq!(snapshot.logs, vec!["行3", "行4", "行5"]);

        state.apply(&ProgressEvent::BackupCompleted {
            file_path: "/backups/a.dump".to_string(),
            file_size: 1,
        });
        let snapshot = state.snapshot();
        assert!(!snapshot.is_running);
        // 终止事件保留缓冲，供事后接入的观察者回放
        assert_eq!(snapshot.logs.len(), 3);
    }

    #[tokio::test]
    async fn test_second_start_rejected_while_running() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert_connection(unreachable_connection());
        let coordinator = JobCoordinator::new(&test_config(dir.path()), store);

        // 手动占住槽位，模拟进行中的恢复任务
        assert!(coordinator.state.try_acquire(JobKind::Restore));

        let err = coordinator
            .start_backup(BackupOptions::manual(1, "public"))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::JobAlreadyRunning));

        coordinator.state.release();
    }

    #[tokio::test]
    async fn test_backup_event_sequence_with_exclusions() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert_connection(unreachable_connection());
        let coordinator =
            JobCoordinator::new(&test_config(dir.path()), Arc::clone(&store) as Arc<dyn ConfigStore>);

        let mut observer = coordinator.subscribe();

        let mut options = BackupOptions::manual(1, "public");
        options.excluded_tables = vec!["logs".to_string()];

        // 端口上没有数据库（或根本没有 pg_dump）：任务必然失败，
        // 但事件序列的形状不受影响
        let _ = coordinator.start_backup(options).await;

        let mut events = Vec::new();
        while let Some(event) = observer.try_recv() {
            events.push(event);
        }

        assert!(events[0].is_started(), "第一条必须是 started 事件");

        let commands: Vec<&ProgressEvent> = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::BackupCommand { .. }))
            .collect();
        assert_eq!(commands.len(), 1);
        match commands[0] {
            ProgressEvent::BackupCommand { command } => {
                assert!(command.contains("--exclude-table public.logs"));
                assert!(
                    !command.contains("sup3rs3cret"),
                    "密码不允许出现在命令行事件里"
                );
            }
            _ => unreachable!(),
        }

        let terminals: Vec<&ProgressEvent> =
            events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminals.len(), 1, "终止事件必须恰好一个");
        assert!(events.last().unwrap().is_terminal());

        // 任务结束后槽位已释放，历史记录了失败
        assert!(!coordinator.job_state().is_running);
        let records = store.all_backups();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, BackupStatus::Failed);
        assert!(records[0].error_message.is_some());
    }

    #[tokio::test]
    async fn test_restore_missing_backup_emits_failed() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert_connection(unreachable_connection());
        let coordinator =
            JobCoordinator::new(&test_config(dir.path()), Arc::clone(&store) as Arc<dyn ConfigStore>);

        let mut observer = coordinator.subscribe();
        let err = coordinator.start_restore(999, 1).await.unwrap_err();
        assert!(matches!(err, VaultError::Restore(_)));

        let mut events = Vec::new();
        while let Some(event) = observer.try_recv() {
            events.push(event);
        }
        assert!(matches!(events[0], ProgressEvent::RestoreStarted { .. }));
        assert!(matches!(
            events.last().unwrap(),
            ProgressEvent::RestoreFailed { .. }
        ));

        // 槽位已释放，可以再次启动任务
        assert!(!coordinator.job_state().is_running);
        let restores = store.all_restores();
        assert_eq!(restores.len(), 1);
        assert_eq!(restores[0].status, BackupStatus::Failed);
    }
}
