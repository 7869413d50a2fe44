use crate::constants::{backup, docker, progress};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 应用配置结构
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub backup: BackupConfig,
    pub docker: DockerConfig,
    pub progress: ProgressConfig,
}

/// 备份存储相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackupConfig {
    pub storage_dir: String,
}

/// Docker相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DockerConfig {
    pub socket_path: String,
}

/// 进度广播相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProgressConfig {
    pub log_history: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backup: BackupConfig {
                storage_dir: backup::get_default_storage_dir()
                    .to_string_lossy()
                    .to_string(),
            },
            docker: DockerConfig {
                socket_path: std::env::var(docker::DOCKER_SOCKET_ENV)
                    .unwrap_or_else(|_| docker::DOCKER_SOCKET_PATH.to_string()),
            },
            progress: ProgressConfig {
                log_history: progress::MAX_LOG_HISTORY,
            },
        }
    }
}

impl AppConfig {
    /// 智能查找并加载配置文件
    /// 按优先级查找：config.toml -> pgvault.toml -> .pgvault.toml
    pub fn find_and_load_config() -> Result<Self> {
        let config_files = ["config.toml", "pgvault.toml", ".pgvault.toml"];

        for config_file in &config_files {
            if Path::new(config_file).exists() {
                tracing::info!("找到配置文件: {}", config_file);
                return Self::load_from_file(config_file);
            }
        }

        // 如果没找到配置文件，创建默认配置
        tracing::warn!("未找到配置文件，创建默认配置: config.toml");
        let default_config = Self::default();
        default_config.save_to_file("config.toml")?;
        Ok(default_config)
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)?;

        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::VaultError::custom(format!("序列化配置失败: {e}")))?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// 获取备份目录路径
    pub fn get_backup_dir(&self) -> PathBuf {
        PathBuf::from(&self.backup.storage_dir)
    }

    /// 获取Docker socket路径
    pub fn get_docker_socket(&self) -> PathBuf {
        PathBuf::from(&self.docker.socket_path)
    }

    /// 确保备份目录存在
    pub fn ensure_backup_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.backup.storage_dir)?;
        Ok(())
    }
}
