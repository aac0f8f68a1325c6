use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tandem_sync::CycleSummary;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

pub const CMD_STATUS: &str = "status";
pub const CMD_SYNC: &str = "sync";
pub const CMD_STOP: &str = "stop";

/// JSON newline-delimited request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
}

impl DaemonRequest {
    pub fn new(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
        }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let mut payload = serde_json::to_string(request)?;
    payload.push('\n');
    stream
        .write_all(payload.as_bytes())
        .and_then(|()| stream.flush())
        .map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    Ok(serde_json::from_str(line.trim_end())?)
}

/// Query daemon status, retrying briefly while the socket comes up.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::new(CMD_STATUS);

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    let response = send_request(home, &DaemonRequest::new(CMD_STOP))?;
    response_into_data(response).map(|_| ())
}

/// Run one cycle in the daemon now and return its summary.
pub fn request_sync(home: &Path) -> Result<CycleSummary, DaemonError> {
    let response = send_request(home, &DaemonRequest::new(CMD_SYNC))?;
    summary_from_data(response_into_data(response)?)
}

fn summary_from_data(data: Value) -> Result<CycleSummary, DaemonError> {
    serde_json::from_value(data).map_err(|err| {
        DaemonError::Protocol(format!("sync reply is not a cycle summary: {err}"))
    })
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn missing_socket_means_not_running() {
        let home = TempDir::new().expect("home");
        let err = request_stop(home.path()).unwrap_err();
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }), "got: {err}");
    }

    #[test]
    fn error_response_becomes_protocol_error() {
        let err = response_into_data(DaemonResponse::error("boom")).unwrap_err();
        assert_eq!(err.to_string(), "daemon protocol error: boom");
    }

    #[test]
    fn ok_response_without_data_is_null() {
        let response = DaemonResponse {
            ok: true,
            data: None,
            error: None,
        };
        assert_eq!(response_into_data(response).expect("data"), Value::Null);
    }

    #[test]
    fn sync_reply_decodes_into_summary() {
        let sent = CycleSummary {
            created: 2,
            conflicts: 1,
            baseline_items: 7,
            ..Default::default()
        };
        let data = response_into_data(DaemonResponse::ok(json!(sent.clone()))).expect("data");
        assert_eq!(summary_from_data(data).expect("summary"), sent);
    }

    #[test]
    fn malformed_sync_reply_is_protocol_error() {
        let err = summary_from_data(json!({"created": "many"})).unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(_)), "got: {err}");
        assert!(err.to_string().contains("cycle summary"));
    }

    #[test]
    fn response_wire_shape_omits_empty_fields() {
        let encoded = serde_json::to_value(DaemonResponse::ok(json!({"cycles": 2}))).expect("encode");
        assert_eq!(encoded, json!({"ok": true, "data": {"cycles": 2}}));
    }
}
