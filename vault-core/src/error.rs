use thiserror::Error;

pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("配置错误: {0}")]
    Config(#[from] toml::de::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP 请求错误: {0}")]
    Http(#[from] reqwest::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("已有任务正在执行")]
    JobAlreadyRunning,

    #[error("无法启动 {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} 以退出码 {code} 结束: {output}")]
    ProcessFailed {
        program: String,
        code: i32,
        output: String,
    },

    #[error("未找到目标容器 (ID: {tried_id}, 名称: {tried_name})，请确认容器正在运行")]
    ContainerUnresolved { tried_id: String, tried_name: String },

    #[error("复制文件到容器失败: {0}")]
    FileTransfer(String),

    #[error("Docker API 错误: {0}")]
    Docker(String),

    #[error("备份操作失败: {0}")]
    Backup(String),

    #[error("恢复操作失败: {0}")]
    Restore(String),

    #[error("配置存储错误: {0}")]
    Store(String),

    #[error("cron 表达式无效: {0}")]
    Cron(String),

    #[error("自定义错误: {0}")]
    Custom(String),
}

impl VaultError {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    pub fn docker(msg: impl Into<String>) -> Self {
        Self::Docker(msg.into())
    }

    pub fn backup(msg: impl Into<String>) -> Self {
        Self::Backup(msg.into())
    }

    pub fn restore(msg: impl Into<String>) -> Self {
        Self::Restore(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}
