/// Docker相关常量
pub mod docker {
    /// Docker socket路径（跨平台支持）
    /// Unix/Linux/macOS: /var/run/docker.sock
    /// Windows: \\.\pipe\docker_engine
    #[cfg(unix)]
    pub const DOCKER_SOCKET_PATH: &str = "/var/run/docker.sock";

    #[cfg(windows)]
    pub const DOCKER_SOCKET_PATH: &str = r"\\.\pipe\docker_engine";

    /// 覆盖socket路径的环境变量
    pub const DOCKER_SOCKET_ENV: &str = "DOCKER_SOCKET";

    /// 容器内暂存备份文件的目录
    pub const CONTAINER_STAGING_DIR: &str = "/tmp";

    /// exec 流帧头长度（1字节流类型 + 3字节保留 + 4字节大端长度）
    pub const STREAM_FRAME_HEADER_LEN: usize = 8;
}

/// PostgreSQL相关常量
pub mod postgres {
    /// 默认端口
    pub const DEFAULT_PORT: u16 = 5432;

    /// 密码注入使用的环境变量（绝不放入命令行参数）
    pub const PASSWORD_ENV: &str = "PGPASSWORD";

    /// 备份工具
    pub const PG_DUMP: &str = "pg_dump";

    /// 自定义格式恢复工具
    pub const PG_RESTORE: &str = "pg_restore";

    /// 纯文本格式恢复工具
    pub const PSQL: &str = "psql";
}

/// 备份存储相关常量
pub mod backup {
    use std::path::PathBuf;

    /// 默认备份存储目录
    pub const DEFAULT_STORAGE_DIR: &str = "./backups";

    /// 覆盖存储目录的环境变量
    pub const STORAGE_DIR_ENV: &str = "BACKUP_DIR";

    pub fn get_default_storage_dir() -> PathBuf {
        std::env::var(STORAGE_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORAGE_DIR))
    }
}

/// 进度广播相关常量
pub mod progress {
    /// 日志环形缓冲区容量（超出后丢弃最旧行）
    pub const MAX_LOG_HISTORY: usize = 100;

    /// 每个观察者的事件队列容量（队列满时丢弃该观察者的事件，不阻塞其他观察者）
    pub const OBSERVER_QUEUE_CAPACITY: usize = 256;

    /// 子进程/容器输出行通道容量
    pub const LINE_CHANNEL_CAPACITY: usize = 64;
}

/// webhook 通知相关常量
pub mod webhook {
    /// 通知请求超时（秒）
    pub const REQUEST_TIMEOUT_SECS: u64 = 10;
}
