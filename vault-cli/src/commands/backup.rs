use crate::app::CliApp;
use crate::cli::ConnectionArgs;
use crate::commands::connection_from_args;
use crate::utils::print_event;
use anyhow::Result;
use tracing::info;
use vault_core::backup::BackupOptions;
use vault_core::store::BackupFormat;

/// 手动创建备份
pub async fn run_backup(
    app: &CliApp,
    connection: ConnectionArgs,
    schema: String,
    excluded_tables: Vec<String>,
    excluded_data_tables: Vec<String>,
    plain: bool,
) -> Result<()> {
    app.store.insert_connection(connection_from_args(1, &connection));

    // 把进度事件实时打印到终端，直到终止事件
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

    let mut options = BackupOptions::manual(1, schema);
    options.excluded_tables = excluded_tables;
    options.excluded_data_tables = excluded_data_tables;
    if plain {
        options.format = BackupFormat::Plain;
    }

    let result = app.coordinator.start_backup(options).await;
    let _ = printer.await;

    let outcome = result?;
    info!("备份文件: {}", outcome.file_path.display());
    Ok(())
}
