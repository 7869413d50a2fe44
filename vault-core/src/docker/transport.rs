use crate::{Result, VaultError};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::client::legacy::Client;
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::PathBuf;

/// Docker Engine API 传输层
///
/// 通过本地 unix socket 与 Docker 守护进程通信，只封装
/// 编排层需要的少量端点。
#[derive(Clone)]
pub struct DockerTransport {
    socket: PathBuf,
    client: Client<UnixConnector, Full<Bytes>>,
}

impl DockerTransport {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            client: Client::unix(),
        }
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket
    }

    fn uri(&self, endpoint: &str) -> hyper::Uri {
        Uri::new(&self.socket, endpoint).into()
    }

    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<Response<Incoming>> {
        let request = Request::builder()
            .method(method)
            .uri(self.uri(endpoint))
            .header(hyper::header::CONTENT_TYPE, content_type)
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| VaultError::docker(format!("构造请求失败: {e}")))?;

        self.client
            .request(request)
            .await
            .map_err(|e| VaultError::docker(format!("Docker socket 请求失败 ({endpoint}): {e}")))
    }

    async fn read_body(response: Response<Incoming>) -> Result<Bytes> {
        let collected = response
            .into_body()
            .collect()
            .await
            .map_err(|e| VaultError::docker(format!("读取响应失败: {e}")))?;
        Ok(collected.to_bytes())
    }

    /// 非成功状态码转为带响应正文的错误
    async fn expect_success(response: Response<Incoming>, endpoint: &str) -> Result<Bytes> {
        let status = response.status();
        let bytes = Self::read_body(response).await?;
        if status.is_success() {
            Ok(bytes)
        } else {
            Err(VaultError::docker(format!(
                "{endpoint} 返回 {status}: {}",
                String::from_utf8_lossy(&bytes).trim()
            )))
        }
    }

    /// GET 并解析 JSON；404 映射为 Ok(None)（容器/实例不存在）
    pub async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Option<T>> {
        let response = self
            .send(Method::GET, endpoint, Vec::new(), "application/json")
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bytes = Self::expect_success(response, endpoint).await?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// POST JSON 并解析响应
    pub async fn post_json<T: Serialize, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        payload: &T,
    ) -> Result<R> {
        let body = serde_json::to_vec(payload)?;
        let response = self
            .send(Method::POST, endpoint, body, "application/json")
            .await?;
        let bytes = Self::expect_success(response, endpoint).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// POST JSON 并返回原始流式响应体（exec 输出流）
    pub async fn post_stream<T: Serialize>(&self, endpoint: &str, payload: &T) -> Result<Incoming> {
        let body = serde_json::to_vec(payload)?;
        let response = self
            .send(Method::POST, endpoint, body, "application/json")
            .await?;

        let status = response.status();
        if !status.is_success() {
            let bytes = Self::read_body(response).await?;
            return Err(VaultError::docker(format!(
                "{endpoint} 返回 {status}: {}",
                String::from_utf8_lossy(&bytes).trim()
            )));
        }
        Ok(response.into_body())
    }

    /// 上传 tar 归档（PUT /containers/{id}/archive）
    pub async fn put_tar(&self, endpoint: &str, archive: Vec<u8>) -> Result<()> {
        let response = self
            .send(Method::PUT, endpoint, archive, "application/x-tar")
            .await?;
        Self::expect_success(response, endpoint).await?;
        Ok(())
    }

    /// 下载原始字节（GET /containers/{id}/archive）
    pub async fn get_raw(&self, endpoint: &str) -> Result<Bytes> {
        let response = self
            .send(Method::GET, endpoint, Vec::new(), "application/json")
            .await?;
        Self::expect_success(response, endpoint).await
    }
}
