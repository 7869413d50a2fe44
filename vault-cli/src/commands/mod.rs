pub mod backup;
pub mod restore;
pub mod scheduler;

use crate::cli::ConnectionArgs;
use vault_core::store::ConnectionTarget;

/// 把命令行连接参数组装成连接记录
pub(crate) fn connection_from_args(id: i64, args: &ConnectionArgs) -> ConnectionTarget {
    ConnectionTarget {
        id,
        name: args
            .container
            .clone()
            .unwrap_or_else(|| args.database.clone()),
        host: args.host.clone(),
        port: args.port,
        database: args.database.clone(),
        username: args.username.clone(),
        password: args.password.clone(),
        is_docker: args.container.is_some() || args.container_id.is_some(),
        container_id: args.container_id.clone(),
        container_name: args.container.clone(),
    }
}
