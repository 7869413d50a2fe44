use anyhow::Result;
use std::sync::Arc;
use vault_core::config::AppConfig;
use vault_core::job::JobCoordinator;
use vault_core::store::{ConfigStore, MemoryStore};

use crate::cli::Commands;
use crate::commands;

pub struct CliApp {
    pub config: AppConfig,
    pub store: Arc<MemoryStore>,
    pub coordinator: Arc<JobCoordinator>,
}

impl CliApp {
    /// 使用智能配置查找初始化CLI应用
    pub fn new_with_auto_config() -> Result<Self> {
        let config = AppConfig::find_and_load_config()?;
        config.ensure_backup_dir()?;

        let store = Arc::new(MemoryStore::new());
        let coordinator = Arc::new(JobCoordinator::new(
            &config,
            Arc::clone(&store) as Arc<dyn ConfigStore>,
        ));

        Ok(Self {
            config,
            store,
            coordinator,
        })
    }

    /// 运行命令
    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            // init 在 main 里特例处理，不会走到这里
            Commands::Init { .. } => Ok(()),
            Commands::Backup {
                connection,
                schema,
                excluded_tables,
                excluded_data_tables,
                plain,
            } => {
                commands::backup::run_backup(
                    self,
                    connection,
                    schema,
                    excluded_tables,
                    excluded_data_tables,
                    plain,
                )
                .await
            }
            Commands::Restore { file, connection } => {
                commands::restore::run_restore(self, file, connection).await
            }
            Commands::Scheduler { schedules } => {
                commands::scheduler::run_scheduler(self, schedules).await
            }
        }
    }
}
