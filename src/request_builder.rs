// Request Builder Module
// Piped TCP request commands and the long-poll status payloads sent to the server

use crate::classifier::AccessPointGain;
use crate::modem::{CMD_OPEN_TCP, CMD_START_SEND};
use crate::serial_inbox::LineErrorCounts;
use crate::task_queue::Task;
use crate::template::{fill, format_decimal, TemplateError};

pub const LONG_POLL_REQUEST: &str = "POST /server/esp8266/projectorDeferred HTTP/1.1\r\n\
Content-Length: <1>\r\nHost: <2>\r\nUser-Agent: ESP8266\r\n\
Content-Type: application/json\r\nAccept: application/json\r\n\
Connection: keep-alive\r\n\r\n<3>\r\n";

pub const STATUS_JSON: &str = "{\"gain\":\"<1>\",\"debugInfoIncluded\":<2>,\"timeStamp\":\"<3>\"}";

pub const DEBUG_STATUS_JSON: &str = "{\"gain\":\"<1>\",\"debugInfoIncluded\":<2>,\
\"errors\":\"<3>\",\"usartOverrunErrors\":\"<4>\",\"usartIdleLineDetections\":\"<5>\",\
\"usartNoiseDetection\":\"<6>\",\"usartFramingErrors\":\"<7>\",\"lastErrorTask\":\"<8>\",\
\"usartData\":\"<9>\",\"timeStamp\":\"<10>\"}";

/// No wall clock on the device
pub const UNKNOWN_TIMESTAMP: &str = "-1";

const OPEN_SLOT: usize = 0;
const ANNOUNCE_SLOT: usize = 1;
const PAYLOAD_SLOT: usize = 2;

/// The three commands of one request: open the TCP connection, announce the
/// payload length, send the payload. Either all empty or a coherent set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipedRequest {
    slots: [Option<String>; 3],
}

impl PipedRequest {
    pub const fn new() -> Self {
        Self {
            slots: [None, None, None],
        }
    }

    /// Build a fresh set for `payload` towards `host:port`. On error the
    /// current slots are left untouched.
    pub fn prepare(&mut self, host: &str, port: u16, payload: String) -> Result<(), TemplateError> {
        let port = format_decimal(u32::from(port));
        let open = fill(CMD_OPEN_TCP, &[host, port.as_str()])?;
        let length = format_decimal(payload.len() as u32);
        let announce = fill(CMD_START_SEND, &[length.as_str()])?;

        self.slots = [Some(open), Some(announce), Some(payload)];
        Ok(())
    }

    pub fn clear(&mut self) {
        self.slots = [None, None, None];
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn open_command(&self) -> Option<&str> {
        self.slots[OPEN_SLOT].as_deref()
    }

    pub fn announce_command(&self) -> Option<&str> {
        self.slots[ANNOUNCE_SLOT].as_deref()
    }

    pub fn payload(&self) -> Option<&str> {
        self.slots[PAYLOAD_SLOT].as_deref()
    }
}

/// Diagnostic fields of the debug payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugReport {
    pub lifetime_errors: u32,
    pub line_errors: LineErrorCounts,
    pub last_error_task: Option<Task>,
    /// Sanitised receive buffer captured at the last failure
    pub usart_data: Option<String>,
}

/// Status JSON, in its debug form when a report is given
pub fn build_status_json(
    gain: &AccessPointGain,
    debug: Option<&DebugReport>,
) -> Result<String, TemplateError> {
    let gain = gain.to_string();

    let Some(report) = debug else {
        return fill(STATUS_JSON, &[gain.as_str(), "false", UNKNOWN_TIMESTAMP]);
    };

    let errors = format_decimal(report.lifetime_errors);
    let overrun = format_decimal(u32::from(report.line_errors.overrun));
    let idle_line = format_decimal(u32::from(report.line_errors.idle_line));
    let noise = format_decimal(u32::from(report.line_errors.noise));
    let framing = format_decimal(u32::from(report.line_errors.framing));
    let last_error_task = format_decimal(report.last_error_task.map_or(0, Task::id));
    // the snapshot only means something next to the task that produced it
    let usart_data = match report.last_error_task {
        Some(_) => report.usart_data.as_deref().unwrap_or(""),
        None => "",
    };

    fill(
        DEBUG_STATUS_JSON,
        &[
            gain.as_str(),
            "true",
            errors.as_str(),
            overrun.as_str(),
            idle_line.as_str(),
            noise.as_str(),
            framing.as_str(),
            last_error_task.as_str(),
            usart_data,
            UNKNOWN_TIMESTAMP,
        ],
    )
}

/// HTTP envelope around a status body. Content-Length covers the JSON body;
/// the trailing CRLF is not counted.
pub fn build_long_poll_request(host: &str, status_json: &str) -> Result<String, TemplateError> {
    let length = format_decimal(status_json.len() as u32);
    fill(LONG_POLL_REQUEST, &[length.as_str(), host, status_json])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_fills_all_three_slots() {
        let mut request = PipedRequest::new();
        assert!(request.is_empty());

        request
            .prepare("10.0.0.2", 8080, "hello".to_string())
            .unwrap();
        assert_eq!(
            request.open_command(),
            Some("AT+CIPSTART=\"TCP\",\"10.0.0.2\",8080\r\n")
        );
        assert_eq!(request.announce_command(), Some("AT+CIPSEND=5\r\n"));
        assert_eq!(request.payload(), Some("hello"));

        request.clear();
        assert!(request.is_empty());
        assert_eq!(request.payload(), None);
    }

    #[test]
    fn test_prepare_replaces_previous_request() {
        let mut request = PipedRequest::new();
        request.prepare("a", 1, "first".to_string()).unwrap();
        request.prepare("b", 2, "second!".to_string()).unwrap();
        assert_eq!(request.announce_command(), Some("AT+CIPSEND=7\r\n"));
        assert_eq!(request.payload(), Some("second!"));
    }

    #[test]
    fn test_plain_status_json() {
        let gain = AccessPointGain::unknown();
        assert_eq!(
            build_status_json(&gain, None).unwrap(),
            "{\"gain\":\"    \",\"debugInfoIncluded\":false,\"timeStamp\":\"-1\"}"
        );
    }

    #[test]
    fn test_debug_status_json_includes_snapshot_with_task() {
        let report = DebugReport {
            lifetime_errors: 12,
            line_errors: LineErrorCounts {
                overrun: 1,
                idle_line: 0,
                noise: 3,
                framing: 0,
            },
            last_error_task: Some(Task::AwaitLongPoll),
            usart_data: Some("rnERRORrn".to_string()),
        };
        let json = build_status_json(&AccessPointGain::unknown(), Some(&report)).unwrap();

        assert!(json.contains("\"debugInfoIncluded\":true"));
        assert!(json.contains("\"errors\":\"12\""));
        assert!(json.contains("\"usartOverrunErrors\":\"1\""));
        assert!(json.contains("\"usartNoiseDetection\":\"3\""));
        assert!(json.contains("\"lastErrorTask\":\"16\""));
        assert!(json.contains("\"usartData\":\"rnERRORrn\""));
        assert!(json.ends_with("\"timeStamp\":\"-1\"}"));

        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["usartFramingErrors"], "0");
    }

    #[test]
    fn test_debug_status_json_drops_snapshot_without_task() {
        let report = DebugReport {
            usart_data: Some("stale".to_string()),
            ..DebugReport::default()
        };
        let json = build_status_json(&AccessPointGain::unknown(), Some(&report)).unwrap();
        assert!(json.contains("\"lastErrorTask\":\"0\""));
        assert!(json.contains("\"usartData\":\"\""));
    }

    #[test]
    fn test_long_poll_request_envelope() {
        let body = "{\"gain\":\" -60\"}";
        let request = build_long_poll_request("10.0.0.2", body).unwrap();

        assert!(request.starts_with("POST /server/esp8266/projectorDeferred HTTP/1.1\r\n"));
        assert!(request.contains(&format!("Content-Length: {}\r\n", body.len())));
        assert!(request.contains("Host: 10.0.0.2\r\n"));
        assert!(request.ends_with(&format!("\r\n\r\n{}\r\n", body)));
    }
}
