use serde::{Deserialize, Serialize};

/// 容器详情（GET /containers/{id}/json 的子集）
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerInspect {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "State")]
    pub state: ContainerState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerState {
    #[serde(rename = "Running")]
    pub running: bool,
}

/// 容器列表条目（GET /containers/json 的子集）
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerSummary {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Names", default)]
    pub names: Vec<String>,
    #[serde(rename = "Image", default)]
    pub image: String,
}

/// POST /containers/{id}/exec
#[derive(Debug, Serialize)]
pub struct ExecCreateRequest {
    #[serde(rename = "AttachStdout")]
    pub attach_stdout: bool,
    #[serde(rename = "AttachStderr")]
    pub attach_stderr: bool,
    #[serde(rename = "Cmd")]
    pub cmd: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExecCreateResponse {
    #[serde(rename = "Id")]
    pub id: String,
}

/// POST /exec/{id}/start
#[derive(Debug, Serialize)]
pub struct ExecStartRequest {
    #[serde(rename = "Detach")]
    pub detach: bool,
    #[serde(rename = "Tty")]
    pub tty: bool,
}

/// GET /exec/{id}/json 的子集
#[derive(Debug, Deserialize)]
pub struct ExecInspectResponse {
    #[serde(rename = "ExitCode")]
    pub exit_code: Option<i64>,
}
