//! Errors raised by the server layer itself.
//!
//! Gateway and store failures use `precache_core::Error`; these cover tool
//! arguments and server state.

use rmcp::model::{ErrorCode, ErrorData as McpError};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Invalid tool arguments (e.g., unknown HTTP method).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// A cache alias was used before any version was registered.
    #[error("NO_ACTIVE_VERSION: no gateway version is active")]
    NoActiveVersion,

    /// Tool output could not be serialized.
    #[error("SERIALIZE_FAILED: {0}")]
    Serialize(String),
}

impl From<ToolError> for McpError {
    fn from(err: ToolError) -> Self {
        let code = match &err {
            ToolError::InvalidInput(_) => -32602,
            ToolError::NoActiveVersion => -32017,
            ToolError::Serialize(_) => -32000,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_codes() {
        let err: McpError = ToolError::InvalidInput("bad method".into()).into();
        assert_eq!(err.code.0, -32602);
        assert!(err.message.contains("INVALID_INPUT"));

        let err: McpError = ToolError::NoActiveVersion.into();
        assert_eq!(err.code.0, -32017);
    }
}
