// Modem Module
// Fixed AT command vocabulary, response markers and the hardware seams the scheduler drives

use anyhow::Result;

// Commands (CRLF terminated, placeholders filled by crate::template)
pub const CMD_DISABLE_ECHO: &str = "ATE0\r\n";
pub const CMD_LIST_NETWORKS: &str = "AT+CWLAP\r\n";
pub const CMD_QUERY_AP_STATUS: &str = "AT+CWJAP?\r\n";
pub const CMD_JOIN_NETWORK: &str = "AT+CWJAP_DEF=\"<1>\",\"<2>\"\r\n";
pub const CMD_OPEN_TCP: &str = "AT+CIPSTART=\"TCP\",\"<1>\",<2>\r\n";
pub const CMD_CLOSE_TCP: &str = "AT+CIPCLOSE\r\n";
pub const CMD_PING: &str = "AT+PING=\"<1>\"\r\n";
pub const CMD_START_SEND: &str = "AT+CIPSEND=<1>\r\n";
pub const CMD_QUERY_MODE: &str = "AT+CWMODE_DEF?\r\n";
pub const CMD_SET_STATION_MODE: &str = "AT+CWMODE_DEF=1\r\n";
pub const CMD_QUERY_STATIC_IP: &str = "AT+CIPSTA_DEF?\r\n";
pub const CMD_SET_STATIC_IP: &str = "AT+CIPSTA_DEF=\"<1>\"\r\n";

// Response markers (substring matched)
pub const RESP_OK: &str = "OK";
pub const RESP_ERROR: &str = "ERROR";
pub const RESP_CLOSED: &str = "CLOSED";
pub const RESP_DATA_PREFIX: &str = "+IPD";
pub const RESP_READY_PROMPT: &str = ">";
pub const RESP_ALREADY_CONNECTED: &str = "ALREADY CONNECTED";
pub const RESP_BUSY: &str = "busy";
pub const RESP_CONNECTED: &str = "CONNECT";
pub const RESP_NOT_CONNECTED: &str = "No AP";
pub const RESP_SEND_OK: &str = "\r\nSEND OK\r\n";
pub const RESP_NETWORK_LIST_PREFIX: &str = "+CWLAP:";
pub const RESP_WIFI_MODE_PREFIX: &str = "+CWMODE_DEF:";
pub const RESP_STATION_MODE: &str = "1";
pub const RESP_STATIC_IP_PREFIX: &str = "+CIPSTA_DEF:ip:";

// Server-initiated close as delivered by the modem
pub const RESP_SERVER_CLOSE_PREFIX: &str = "\r\n+IPD,5:0";
pub const RESP_SERVER_CLOSE_SUFFIX: &str = "CLOSED\r\n";

// HTTP and application level markers of the long-poll exchange
pub const HTTP_STATUS_OK: &str = "200 OK";
pub const HTTP_SERVICE_UNAVAILABLE: &str = "503 Service Unavailable";
pub const APP_STATUS_OK: &str = "\"statusCode\":\"OK\"";
pub const APP_INCLUDE_DEBUG: &str = "\"includeDebugInfo\":true";
pub const APP_RELAY_ON: &str = "\"turnOn\":true";

/// Byte transmit primitive towards the modem.
///
/// Fire-and-forget: completion is inferred from the idle gap on the receive
/// side, never from an acknowledgment here.
pub trait ModemPort {
    fn transmit(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Modem power control line
pub trait PowerLine {
    fn set_enabled(&mut self, enabled: bool);
    fn is_enabled(&self) -> bool;
}

/// Binary status outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    Network,
    Server,
    Relay,
}

pub trait Indicators {
    fn set(&mut self, indicator: Indicator, on: bool);
}

/// Processor restart hook used by the last recovery step
pub trait SystemControl {
    fn restart(&mut self);
}
