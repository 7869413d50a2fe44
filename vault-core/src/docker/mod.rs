// 模块声明
mod demux;
mod executor;
mod transport;
mod types;

// 重新导出公共API
pub use demux::StreamDemuxer;
pub use executor::{ContainerExecutor, ExecOutcome, Resolution};
pub use transport::DockerTransport;
pub use types::{ContainerInspect, ContainerState, ContainerSummary};
