use crate::constants::postgres;
use crate::process::CommandLine;
use crate::store::{BackupFormat, ConnectionTarget, ScheduleConfig};
use chrono::Utc;

/// 备份选项
#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub connection_id: i64,
    pub schema: String,
    /// 完全排除的表（结构和数据都不导出）
    pub excluded_tables: Vec<String>,
    /// 只排除数据、保留结构的表
    pub excluded_data_tables: Vec<String>,
    pub format: BackupFormat,
    /// 定时触发时所属的定时配置
    pub schedule_id: Option<i64>,
}

impl BackupOptions {
    /// 手动备份
    pub fn manual(connection_id: i64, schema: impl Into<String>) -> Self {
        Self {
            connection_id,
            schema: schema.into(),
            excluded_tables: Vec::new(),
            excluded_data_tables: Vec::new(),
            format: BackupFormat::Custom,
            schedule_id: None,
        }
    }

    /// 定时配置触发的备份
    pub fn from_schedule(schedule: &ScheduleConfig) -> Self {
        Self {
            connection_id: schedule.connection_id,
            schema: schedule.schema.clone(),
            excluded_tables: schedule.excluded_tables.clone(),
            excluded_data_tables: schedule.excluded_data_tables.clone(),
            format: schedule.format,
            schedule_id: Some(schedule.id),
        }
    }
}

/// 生成备份文件名：backup_{库}_{schema}_{时间戳}.{dump|sql}
pub fn backup_file_name(database: &str, schema: &str, format: BackupFormat) -> String {
    let timestamp = Utc::now().format("%Y-%m-%d_%H-%M-%S");
    format!(
        "backup_{database}_{schema}_{timestamp}.{}",
        format.file_extension()
    )
}

/// 构造 pg_dump 命令
///
/// `over_network` 为 true 时走主机网络连接（-h/-p，密码经
/// PGPASSWORD 环境变量注入）；为 false 时在容器内执行，使用
/// 容器内默认的本地连接方式。密码绝不进入参数向量。
pub fn build_pg_dump_command(
    connection: &ConnectionTarget,
    options: &BackupOptions,
    output_path: &str,
    over_network: bool,
) -> CommandLine {
    let mut command = CommandLine::new(postgres::PG_DUMP);

    if over_network {
        command = command
            .args(["-h", &connection.host])
            .args(["-p", &connection.port.to_string()]);
    }

    command = command
        .args(["-U", &connection.username])
        .args(["-d", &connection.database])
        .args(["-n", &options.schema])
        .args(["-F", options.format.pg_dump_flag()])
        .args(["-f", output_path])
        .arg("--verbose");

    for table in &options.excluded_tables {
        command = command.args(["--exclude-table", &format!("{}.{table}", options.schema)]);
    }
    for table in &options.excluded_data_tables {
        command = command.args(["--exclude-table-data", &format!("{}.{table}", options.schema)]);
    }

    if over_network {
        command = command.env(
            postgres::PASSWORD_ENV,
            connection.password.clone().unwrap_or_default(),
        );
    }

    command
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> ConnectionTarget {
        ConnectionTarget {
            id: 1,
            name: "app-db".to_string(),
            host: "db.internal".to_string(),
            port: 5433,
            database: "app".to_string(),
            username: "postgres".to_string(),
            password: Some("s3cret".to_string()),
            is_docker: false,
            container_id: None,
            container_name: None,
        }
    }

    #[test]
    fn test_pg_dump_command_shape() {
        let mut options = BackupOptions::manual(1, "public");
        options.excluded_tables = vec!["logs".to_string()];
        options.excluded_data_tables = vec!["sessions".to_string()];

        let command =
            build_pg_dump_command(&connection(), &options, "/backups/a.dump", true);
        let rendered = command.rendered();

        assert!(rendered.starts_with("pg_dump -h db.internal -p 5433"));
        assert!(rendered.contains("-U postgres -d app -n public -F c -f /backups/a.dump"));
        assert!(rendered.contains("--verbose"));
        assert!(rendered.contains("--exclude-table public.logs"));
        assert!(rendered.contains("--exclude-table-data public.sessions"));
    }

    #[test]
    fn test_password_only_in_env() {
        let options = BackupOptions::manual(1, "public");
        let command = build_pg_dump_command(&connection(), &options, "/backups/a.dump", true);

        assert!(!command.rendered().contains("s3cret"));
        assert!(
            command
                .envs
                .iter()
                .any(|(k, v)| k == "PGPASSWORD" && v == "s3cret")
        );
    }

    #[test]
    fn test_container_command_skips_network_flags() {
        let options = BackupOptions::manual(1, "public");
        let command = build_pg_dump_command(&connection(), &options, "/tmp/a.dump", false);
        let rendered = command.rendered();

        assert!(!rendered.contains("-h"));
        assert!(!rendered.contains("-p 5433"));
        assert!(command.envs.is_empty());
    }

    #[test]
    fn test_plain_format_extension() {
        let name = backup_file_name("app", "public", BackupFormat::Plain);
        assert!(name.starts_with("backup_app_public_"));
        assert!(name.ends_with(".sql"));

        let name = backup_file_name("app", "public", BackupFormat::Custom);
        assert!(name.ends_with(".dump"));
    }
}
