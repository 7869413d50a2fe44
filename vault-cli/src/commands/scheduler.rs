use crate::app::CliApp;
use crate::utils::print_event;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use vault_core::scheduler::Scheduler;
use vault_core::store::{ConfigStore, ConnectionTarget, ScheduleConfig};

/// 调度定义文件：连接 + 定时配置
#[derive(Debug, Deserialize)]
struct ScheduleFile {
    #[serde(default)]
    connections: Vec<ConnectionTarget>,
    #[serde(default)]
    schedules: Vec<ScheduleConfig>,
}

/// 前台运行定时调度器
pub async fn run_scheduler(app: &CliApp, schedules_path: PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(&schedules_path)
        .with_context(|| format!("读取调度定义失败: {}", schedules_path.display()))?;
    let file: ScheduleFile = toml::from_str(&content)
        .with_context(|| format!("解析调度定义失败: {}", schedules_path.display()))?;
    anyhow::ensure!(!file.schedules.is_empty(), "调度定义文件里没有任何 schedules");

    for connection in file.connections {
        app.store.insert_connection(connection);
    }
    for schedule in file.schedules {
        app.store.insert_schedule(schedule);
    }

    let scheduler = Scheduler::new(
        Arc::clone(&app.coordinator),
        Arc::clone(&app.store) as Arc<dyn ConfigStore>,
    );
    scheduler.reload().await?;
    info!(
        "📅 调度器已启动（{} 个定时任务），Ctrl-C 退出",
        scheduler.active_timer_count().await
    );

    // 持续把进度事件打印到终端，直到收到退出信号
    let mut observer = app.coordinator.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = observer.recv() => {
                match event {
                    Some(event) => print_event(&event),
                    None => break,
                }
            }
        }
    }

    scheduler.stop_all().await;
    info!("调度器已停止");
    Ok(())
}
