use crate::app::CliApp;
use crate::cli::ConnectionArgs;
use crate::commands::connection_from_args;
use crate::utils::print_event;
use anyhow::Result;
use std::path::PathBuf;
use vault_core::store::{BackupStatus, ConfigStore, NewBackupRecord};

/// 从备份文件恢复
pub async fn run_restore(app: &CliApp, file: PathBuf, connection: ConnectionArgs) -> Result<()> {
    anyhow::ensure!(file.exists(), "备份文件不存在: {}", file.display());

    app.store.insert_connection(connection_from_args(1, &connection));

    // 把要恢复的文件登记为一条历史记录，复用统一的恢复入口
    let file_size = tokio::fs::metadata(&file).await.ok().map(|m| m.len() as i64);
    let backup_id = app
        .store
        .add_backup_history(NewBackupRecord {
            schedule_id: None,
            connection_id: Some(1),
            schema: "imported".to_string(),
            file_path: file.display().to_string(),
            file_size,
            status: BackupStatus::Completed,
            error_message: None,
        })
        .await?;

    let mut observer = app.coordinator.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = observer.recv().await {
            let terminal = event.is_terminal();
            print_event(&event);
            if terminal {
                break;
            }
        }
    });

    let result = app.coordinator.start_restore(backup_id, 1).await;
    let _ = printer.await;
    result?;
    Ok(())
}
