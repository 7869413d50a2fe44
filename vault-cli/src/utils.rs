use tracing::info;
use vault_core::events::ProgressEvent;

/// 设置日志记录系统
///
/// - 库代码只使用 tracing 宏记录日志
/// - 在应用入口配置日志输出行为
/// - 支持 RUST_LOG 环境变量控制日志级别
/// - 默认输出到stderr，终端输出简洁格式，文件输出详细格式
pub fn setup_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    // 根据verbose参数和环境变量确定日志级别
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // 检查环境变量，决定是否输出到文件
    if let Ok(log_file) = std::env::var("VAULT_LOG_FILE") {
        // 输出到文件 - 使用详细格式便于调试
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .expect("Failed to create log file");

        fmt()
            .with_env_filter(env_filter)
            .with_writer(file)
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true)
            .init();
    } else {
        // 输出到终端 - 使用简洁格式，用户友好
        fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_names(false)
            .with_line_number(false)
            .without_time()
            .compact()
            .init();
    }
}

/// 把进度事件渲染成终端行
pub fn print_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::BackupStarted { schema, .. } => {
            info!("💾 备份开始 (schema: {})", schema.as_deref().unwrap_or("public"));
        }
        ProgressEvent::BackupCommand { command } => {
            info!("📋 执行命令: {}", command);
        }
        ProgressEvent::BackupProgress { message } | ProgressEvent::RestoreProgress { message } => {
            info!("   {}", message);
        }
        ProgressEvent::BackupCompleted {
            file_path,
            file_size,
        } => {
            info!("✅ 备份完成: {} ({} 字节)", file_path, file_size);
        }
        ProgressEvent::BackupFailed { error } => {
            info!("❌ 备份失败: {}", error);
        }
        ProgressEvent::RestoreStarted { backup_id, .. } => {
            info!("📥 恢复开始 (备份 #{})", backup_id);
        }
        ProgressEvent::RestoreCompleted { message } => {
            info!("✅ {}", message);
        }
        ProgressEvent::RestoreFailed { error } => {
            info!("❌ 恢复失败: {}", error);
        }
        ProgressEvent::SyncState { state } => {
            for line in &state.logs {
                info!("   {}", line);
            }
        }
    }
}
