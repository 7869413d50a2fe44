use anyhow::Result;
use tracing::{info, warn};
use vault_core::config::AppConfig;

/// 初始化：生成默认配置文件并创建备份目录
pub async fn run_init(force: bool) -> Result<()> {
    let path = std::path::Path::new("config.toml");

    if path.exists() && !force {
        warn!("配置文件已存在: {}（使用 --force 覆盖）", path.display());
        return Ok(());
    }

    let config = AppConfig::default();
    config.save_to_file(path)?;
    config.ensure_backup_dir()?;

    info!("✅ 已生成默认配置: {}", path.display());
    info!("   备份目录: {}", config.backup.storage_dir);
    Ok(())
}
