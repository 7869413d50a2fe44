use crate::{Result, VaultError};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// 待执行的外部命令
///
/// 敏感信息（数据库密码）只允许通过环境变量注入，
/// rendered() 给观察者展示的命令行里永远不会出现。
#[derive(Debug, Clone)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// 完整命令行字符串，在执行前通过 *_command 事件发给观察者
    pub fn rendered(&self) -> String {
        let mut rendered = self.program.clone();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }

    /// 容器内执行时的 argv 形式
    pub fn to_argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// 命令执行完毕后累积的全部输出（诊断用）
#[derive(Debug)]
pub struct CapturedOutput {
    pub output: String,
}

/// 本地外部命令执行器
///
/// 逐行推送 stdout/stderr（边产出边转发，不等进程结束），
/// 退出码非零与无法启动是两类不同的错误。
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// 执行命令，把每一行输出实时推入 line_tx，等待进程自然结束
    pub async fn run(
        &self,
        command: &CommandLine,
        line_tx: mpsc::Sender<String>,
    ) -> Result<CapturedOutput> {
        // 先确认可执行文件存在，给出比系统错误码更明确的原因
        if which::which(&command.program).is_err() {
            return Err(VaultError::Spawn {
                program: command.program.clone(),
                reason: "未安装或不在 PATH 中".to_string(),
            });
        }

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| VaultError::Spawn {
                program: command.program.clone(),
                reason: e.to_string(),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VaultError::custom("无法获取子进程 stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| VaultError::custom("无法获取子进程 stderr"))?;

        // stdout 与 stderr 并发读取，任一路输出到达即转发
        let (out, err) = tokio::join!(
            forward_lines(stdout, line_tx.clone()),
            forward_lines(stderr, line_tx)
        );

        let status = child.wait().await?;

        let mut output = out?;
        output.push_str(&err?);

        if status.success() {
            Ok(CapturedOutput { output })
        } else {
            Err(VaultError::ProcessFailed {
                program: command.program.clone(),
                code: status.code().unwrap_or(-1),
                output,
            })
        }
    }
}

/// 把一路输出按行切分转发，同时累积全文供诊断
async fn forward_lines<R: AsyncRead + Unpin>(
    reader: R,
    line_tx: mpsc::Sender<String>,
) -> Result<String> {
    let mut lines = BufReader::new(reader).lines();
    let mut accumulated = String::new();

    while let Some(line) = lines.next_line().await? {
        accumulated.push_str(&line);
        accumulated.push('\n');

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        // 接收端已关闭时继续读完输出，退出码仍需收集
        let _ = line_tx.send(trimmed.to_string()).await;
    }

    Ok(accumulated)
}
