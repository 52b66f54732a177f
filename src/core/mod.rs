pub mod realtime;
pub mod tools;

// Re-export commonly used types for convenience
pub use realtime::{
    ConnectionState, RealtimeConfig, RealtimeSession, ResponseDisplay, SessionDeps, SessionError,
    SessionResult,
};
pub use tools::{ToolBackends, ToolCallError, ToolName};
