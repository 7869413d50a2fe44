use crate::constants::postgres;
use crate::process::CommandLine;
use crate::store::{BackupFormat, ConnectionTarget};

/// 构造恢复命令
///
/// 格式由备份文件扩展名决定：.sql 走 psql，其余走 pg_restore
/// （--clean --if-exists：先删除再重建，对象不存在不报错）。
/// `over_network` 的含义与备份侧一致。
pub fn build_restore_command(
    connection: &ConnectionTarget,
    backup_path: &str,
    over_network: bool,
) -> CommandLine {
    let format = BackupFormat::from_file_path(backup_path);

    let program = match format {
        BackupFormat::Custom => postgres::PG_RESTORE,
        BackupFormat::Plain => postgres::PSQL,
    };
    let mut command = CommandLine::new(program);

    if over_network {
        command = command
            .args(["-h", &connection.host])
            .args(["-p", &connection.port.to_string()]);
    }

    command = command
        .args(["-U", &connection.username])
        .args(["-d", &connection.database]);

    command = match format {
        BackupFormat::Custom => command
            .arg("--verbose")
            .arg("--clean")
            .arg("--if-exists")
            .arg(backup_path),
        BackupFormat::Plain => command.args(["-f", backup_path]),
    };

    if over_network {
        command = command.env(
            postgres::PASSWORD_ENV,
            connection.password.clone().unwrap_or_default(),
        );
    }

    command
}

/// 把 pg_restore/psql 的冗长输出转成友好的进度消息
///
/// 未识别的行原样返回。
pub fn friendly_progress(line: &str) -> String {
    if let Some(rest) = line.strip_prefix("pg_restore: creating TABLE") {
        return format!("🔨 Creating table: {}", rest.trim());
    }
    if line.starts_with("pg_restore: restoring data for table") {
        if let Some((_, table)) = line.split_once("table") {
            return format!("📦 Restoring data for table: {}", table.trim());
        }
    }
    if line.starts_with("pg_restore: creating INDEX") {
        return "🔎 Creating index".to_string();
    }
    if line.starts_with("pg_restore: creating CONSTRAINT") {
        return "🔒 Creating constraint".to_string();
    }
    if line.starts_with("pg_restore: processing data for table") {
        if let Some((_, table)) = line.split_once("table") {
            return format!("📦 Processing data: {}", table.trim());
        }
    }
    line.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> ConnectionTarget {
        ConnectionTarget {
            id: 2,
            name: "target-db".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            database: "app".to_string(),
            username: "postgres".to_string(),
            password: Some("pw".to_string()),
            is_docker: false,
            container_id: None,
            container_name: None,
        }
    }

    #[test]
    fn test_custom_format_uses_pg_restore() {
        let command = build_restore_command(&connection(), "/backups/a.dump", true);
        let rendered = command.rendered();

        assert!(rendered.starts_with("pg_restore -h localhost -p 5432"));
        assert!(rendered.contains("--verbose --clean --if-exists /backups/a.dump"));
    }

    #[test]
    fn test_plain_format_uses_psql() {
        let command = build_restore_command(&connection(), "/backups/a.sql", true);
        let rendered = command.rendered();

        assert!(rendered.starts_with("psql"));
        assert!(rendered.contains("-f /backups/a.sql"));
        assert!(!rendered.contains("--clean"));
    }

    #[test]
    fn test_container_restore_skips_network_flags() {
        let command = build_restore_command(&connection(), "/tmp/a.dump", false);
        let rendered = command.rendered();

        assert!(!rendered.contains("-h localhost"));
        assert!(command.envs.is_empty());
    }

    #[test]
    fn test_friendly_progress_mapping() {
        assert_eq!(
            friendly_progress("pg_restore: creating TABLE public.users"),
            "🔨 Creating table: public.users"
        );
        assert_eq!(
            friendly_progress("pg_restore: restoring data for table \"public.users\""),
            "📦 Restoring data for table: \"public.users\""
        );
        assert_eq!(
            friendly_progress("pg_restore: creating INDEX idx_users"),
            "🔎 Creating index"
        );
        assert_eq!(
            friendly_progress("pg_restore: creating CONSTRAINT users_pkey"),
            "🔒 Creating constraint"
        );
        assert_eq!(
            friendly_progress("pg_restore: processing data for table \"public.logs\""),
            "📦 Processing data: \"public.logs\""
        );
        // 未识别的行原样透传
        assert_eq!(friendly_progress("unrelated output"), "unrelated output");
    }
}
