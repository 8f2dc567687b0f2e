//! Remote command execution subsystem.
//!
//! # Data Flow
//! ```text
//! RemoteExecutor::exec / exec_streaming
//!     → transport.rs (ExecTransport: resolve pod, open channel)
//!         → kubernetes.rs (pod exec websocket)
//!         → local.rs (child process, same framing)
//!     → demux.rs (channel index + preamble skipping)
//!     → response.rs (control channel → ExecResponse)
//!     → error.rs (RemoteExecError on non-success)
//! ```
//!
//! # Design Decisions
//! - No retries at this layer; callers decide
//! - Every call takes a cancellation token tied to its request
//! - Both transports emit the same channel-prefixed frames

pub mod demux;
pub mod error;
pub mod executor;
pub mod kubernetes;
pub mod local;
pub mod response;
pub mod transport;

pub use demux::{ChannelIndex, Demultiplexer, StreamMode};
pub use error::{ExecError, RemoteExecError};
pub use executor::{format_command, RemoteExecutor};
pub use kubernetes::KubeExecTransport;
pub use local::LocalExecTransport;
pub use response::{ExecResponse, ExecStatus};
pub use transport::{ContainerInfo, ExecTarget, ExecTransport};
