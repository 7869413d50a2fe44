use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vault_core::constants::postgres;

/// pgvault CLI - PostgreSQL 备份、恢复与定时调度工具
#[derive(Parser)]
#[command(name = "vault-cli")]
#[command(about = "PostgreSQL 备份、恢复与定时调度工具")]
#[command(version)]
pub struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// 详细输出
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// 数据库连接参数（备份/恢复共用）
#[derive(clap::Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// 数据库主机
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// 数据库端口
    #[arg(long, default_value_t = postgres::DEFAULT_PORT)]
    pub port: u16,

    /// 数据库名
    #[arg(short, long)]
    pub database: String,

    /// 用户名
    #[arg(short, long, default_value = "postgres")]
    pub username: String,

    /// 密码（推荐通过 PGPASSWORD 环境变量传入）
    #[arg(long, env = "PGPASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// 目标数据库运行在 Docker 容器内，按此名称解析容器
    #[arg(long)]
    pub container: Option<String>,

    /// 已知的容器ID（失效时按 --container 名称自愈解析）
    #[arg(long)]
    pub container_id: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 首次使用时初始化，创建默认配置文件
    Init {
        /// 如果配置文件已存在，强制覆盖
        #[arg(long)]
        force: bool,
    },
    /// 手动创建备份
    Backup {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// 要备份的 schema
        #[arg(short = 'n', long, default_value = "public")]
        schema: String,

        /// 完全排除的表（可多次指定）
        #[arg(long = "exclude-table")]
        excluded_tables: Vec<String>,

        /// 只排除数据、保留结构的表（可多次指定）
        #[arg(long = "exclude-table-data")]
        excluded_data_tables: Vec<String>,

        /// 输出纯 SQL 文本而不是自定义格式
        #[arg(long)]
        plain: bool,
    },
    /// 从备份文件恢复
    Restore {
        /// 备份文件路径（.dump 走 pg_restore，.sql 走 psql）
        file: PathBuf,

        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// 前台运行定时调度器（从调度定义文件加载）
    Scheduler {
        /// 调度定义文件（TOML：connections + schedules）
        #[arg(short, long, default_value = "schedules.toml")]
        schedules: PathBuf,
    },
}
