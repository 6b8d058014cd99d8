pub mod peer;
pub mod process;

// Re-exports for convenience
pub use peer::{ApplicationId, LocalPeer, PeerClient, PeerError, PeerRole, PeerServer};
pub use process::supervisor::{ChildProcessSupervisor, OutputStream, ProcessEvent, ProcessState};
pub use process::{ProcessCommand, ProcessError};
