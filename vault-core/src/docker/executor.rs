use super::demux::StreamDemuxer;
use super::transport::DockerTransport;
use super::types::{
    ContainerInspect, ContainerSummary, ExecCreateRequest, ExecCreateResponse, ExecInspectResponse,
    ExecStartRequest,
};
use crate::{Result, VaultError};
use http_body_util::BodyExt;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// 容器内命令执行结果
#[derive(Debug)]
pub struct ExecOutcome {
    pub exit_code: i64,
    /// 累积的全部输出（诊断用）
    pub output: String,
}

/// 容器标识解析结果
#[derive(Debug, Clone)]
pub struct Resolution {
    pub id: String,
    /// 经过了按名称自愈解析；调用方必须把新ID回写连接记录，
    /// 下次操作才能直接验证通过而不再查名称
    pub healed: bool,
}

/// 容器命令执行器
///
/// 通过 Docker Engine API 在容器内执行命令、复制文件，
/// 并在存储的容器ID失效时按名称自愈解析。
#[derive(Clone)]
pub struct ContainerExecutor {
    transport: DockerTransport,
}

impl ContainerExecutor {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            transport: DockerTransport::new(socket),
        }
    }

    pub fn with_transport(transport: DockerTransport) -> Self {
        Self { transport }
    }

    /// 在容器内执行命令
    ///
    /// 输出流按帧解复用后逐行推入 line_tx（与本地命令执行的行语义
    /// 一致），命令结束后返回退出码与累积输出。
    pub async fn exec(
        &self,
        container_id: &str,
        argv: &[String],
        line_tx: mpsc::Sender<String>,
    ) -> Result<ExecOutcome> {
        let create: ExecCreateResponse = self
            .transport
            .post_json(
                &format!("/containers/{container_id}/exec"),
                &ExecCreateRequest {
                    attach_stdout: true,
                    attach_stderr: true,
                    cmd: argv.to_vec(),
                },
            )
            .await?;

        let mut body = self
            .transport
            .post_stream(
                &format!("/exec/{}/start", create.id),
                &ExecStartRequest {
                    detach: false,
                    tty: false,
                },
            )
            .await?;

        // 响应体的分块边界与帧边界无关，解复用器负责跨块拼接
        let mut demuxer = StreamDemuxer::new();
        let mut output = String::new();

        while let Some(next) = body.frame().await {
            let frame = next.map_err(|e| VaultError::docker(format!("读取 exec 输出流失败: {e}")))?;
            if let Some(data) = frame.data_ref() {
                for line in demuxer.feed(data) {
                    forward_line(&line_tx, &mut output, line).await;
                }
            }
        }
        if let Some(rest) = demuxer.finish() {
            forward_line(&line_tx, &mut output, rest).await;
        }

        let inspect: ExecInspectResponse = self
            .transport
            .get_json(&format!("/exec/{}/json", create.id))
            .await?
            .ok_or_else(|| VaultError::docker("exec 实例已不存在"))?;

        Ok(ExecOutcome {
            exit_code: inspect.exit_code.unwrap_or(-1),
            output,
        })
    }

    /// 验证容器存在且正在运行
    pub async fn verify_container(&self, container_id: &str) -> Result<bool> {
        if container_id.is_empty() {
            return Ok(false);
        }
        let inspect: Option<ContainerInspect> = self
            .transport
            .get_json(&format!("/containers/{container_id}/json"))
            .await?;
        Ok(inspect.map(|c| c.state.running).unwrap_or(false))
    }

    /// 自愈解析容器标识
    ///
    /// 存储的ID仍然有效时直接使用；失效时（容器重建后ID变化）
    /// 按逻辑名称在运行中的容器里查找：先精确匹配，再子串匹配。
    /// 找不到任何匹配返回 ContainerUnresolved，调用方必须在任何
    /// 破坏性步骤（复制文件、执行恢复）之前中止。
    pub async fn resolve_container(
        &self,
        stored_id: Option<&str>,
        logical_name: &str,
    ) -> Result<Resolution> {
        if let Some(id) = stored_id {
            if self.verify_container(id).await? {
                return Ok(Resolution {
                    id: id.to_string(),
                    healed: false,
                });
            }
            tracing::warn!(
                container_id = id,
                logical_name,
                "存储的容器ID已失效，尝试按名称解析"
            );
        }

        let containers: Vec<ContainerSummary> = self
            .transport
            .get_json("/containers/json")
            .await?
            .unwrap_or_default();

        match match_container(&containers, logical_name) {
            Some(found) => {
                tracing::info!(
                    container_id = %found.id,
                    logical_name,
                    "按名称解析到新容器"
                );
                Ok(Resolution {
                    id: found.id.clone(),
                    healed: true,
                })
            }
            None => Err(VaultError::ContainerUnresolved {
                tried_id: stored_id.unwrap_or_default().to_string(),
                tried_name: logical_name.to_string(),
            }),
        }
    }

    /// 把本地文件复制进容器
    ///
    /// Docker API 要求 tar 归档格式；任何失败都在远端恢复命令
    /// 执行之前中止调用方操作，绝不把残缺文件喂给 pg_restore/psql。
    pub async fn copy_file_to_container(
        &self,
        container_id: &str,
        local_path: &Path,
        container_path: &str,
    ) -> Result<()> {
        let (dir, file_name) = split_container_path(container_path);

        let content = tokio::fs::read(local_path)
            .await
            .map_err(|e| VaultError::FileTransfer(format!("读取本地文件失败: {e}")))?;

        let file_name_owned = file_name.to_string();
        let archive = tokio::task::spawn_blocking(move || {
            build_single_file_archive(&file_name_owned, &content)
        })
        .await??;

        let endpoint = format!(
            "/containers/{container_id}/archive?path={}",
            urlencoding::encode(dir)
        );
        self.transport
            .put_tar(&endpoint, archive)
            .await
            .map_err(|e| VaultError::FileTransfer(e.to_string()))?;

        Ok(())
    }

    /// 把容器内文件取回本地（容器内备份的产物）
    pub async fn copy_file_from_container(
        &self,
        container_id: &str,
        container_path: &str,
        local_path: &Path,
    ) -> Result<()> {
        let endpoint = format!(
            "/containers/{container_id}/archive?path={}",
            urlencoding::encode(container_path)
        );
        let bytes = self
            .transport
            .get_raw(&endpoint)
            .await
            .map_err(|e| VaultError::FileTransfer(e.to_string()))?;

        let dest = local_path.to_path_buf();
        tokio::task::spawn_blocking(move || extract_single_file(&bytes, &dest)).await??;

        Ok(())
    }
}

async fn forward_line(line_tx: &mpsc::Sender<String>, output: &mut String, line: String) {
    output.push_str(&line);
    output.push('\n');

    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }
    // 接收端关闭时继续消费流，退出码仍需收集
    let _ = line_tx.send(trimmed.to_string()).await;
}

/// 容器名匹配：先精确匹配（API返回的名称带 '/' 前缀），再子串匹配
pub(crate) fn match_container<'a>(
    containers: &'a [ContainerSummary],
    logical_name: &str,
) -> Option<&'a ContainerSummary> {
    if let Some(exact) = containers.iter().find(|c| {
        c.names
            .iter()
            .any(|n| n.trim_start_matches('/') == logical_name)
    }) {
        return Some(exact);
    }

    let needle = logical_name.to_lowercase();
    containers
        .iter()
        .find(|c| c.names.iter().any(|n| n.to_lowercase().contains(&needle)))
}

/// 把容器内路径拆成（目录，文件名）；容器路径始终是unix风格
pub(crate) fn split_container_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some(("", file_name)) => ("/", file_name),
        Some((dir, file_name)) => (dir, file_name),
        None => ("/", path),
    }
}

/// 把单个文件打包成 Docker API 需要的 tar 归档
pub(crate) fn build_single_file_archive(file_name: &str, content: &[u8]) -> Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_data(&mut header, file_name, content)
        .map_err(|e| VaultError::FileTransfer(format!("构建归档失败: {e}")))?;

    builder
        .into_inner()
        .map_err(|e| VaultError::FileTransfer(format!("完成归档失败: {e}")))
}

/// 从归档中解出第一个常规文件写到本地
pub(crate) fn extract_single_file(archive_bytes: &[u8], dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(archive_bytes);

    for entry in archive
        .entries()
        .map_err(|e| VaultError::FileTransfer(format!("读取归档失败: {e}")))?
    {
        let mut entry = entry.map_err(|e| VaultError::FileTransfer(format!("读取归档条目失败: {e}")))?;
        if entry.header().entry_type().is_file() {
            let mut file = std::fs::File::create(dest)
                .map_err(|e| VaultError::FileTransfer(format!("创建本地文件失败: {e}")))?;
            std::io::copy(&mut entry, &mut file)
                .map_err(|e| VaultError::FileTransfer(format!("写出文件失败: {e}")))?;
            return Ok(());
        }
    }

    Err(VaultError::FileTransfer(
        "归档中没有常规文件".to_string(),
    ))
}
