//! Wire format between the dispatcher and runner processes.
//!
//! Line-delimited JSON-RPC 2.0: every message is one compact JSON object
//! followed by `\n`. Compact JSON escapes embedded newlines, so a line is always
//! exactly one message.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

pub const METHOD_RUN: &str = "run";
pub const METHOD_EXIT: &str = "exit";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    /// Absent for notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(id: Option<Value>, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// Parameters of a `run` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunParams {
    pub module: String,
    pub argv: Vec<String>,
    pub use_stdin: bool,
    pub cwd: PathBuf,
    #[serde(default)]
    pub source: Option<String>,
    /// Workspace the call belongs to, for runners that keep per-workspace state
    #[serde(default)]
    pub workspace: Option<String>,
}

/// Result of a `run` request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReply {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Rendered fault raised by the module, if any
    #[serde(default)]
    pub exception: Option<String>,
}

/// Serialize one message as a single line, newline included
pub fn encode_line<T: Serialize>(message: &T) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_is_one_line() {
        let params = RunParams {
            module: "echo".to_string(),
            argv: vec!["echo".to_string()],
            use_stdin: true,
            cwd: PathBuf::from("/w"),
            source: Some("line one\nline two\n".to_string()),
            workspace: Some("/w".to_string()),
        };
        let request = Request::new(Some(json!(7)), METHOD_RUN, serde_json::to_value(&params).unwrap());
        let line = encode_line(&request).unwrap();
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.ends_with('\n'));

        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["method"], "run");
        assert_eq!(value["params"]["useStdin"], true);
        assert_eq!(value["params"]["source"], "line one\nline two\n");
    }

    #[test]
    fn test_reply_defaults() {
        let reply: RunReply = serde_json::from_value(json!({ "stdout": "out" })).unwrap();
        assert_eq!(reply.stdout, "out");
        assert_eq!(reply.stderr, "");
        assert_eq!(reply.exception, None);
    }

    #[test]
    fn test_error_response_omits_result() {
        let response = Response::error(Value::Null, PARSE_ERROR, "bad json");
        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["code"], PARSE_ERROR);
    }
}
