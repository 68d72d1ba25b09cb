// Task Handler Table
// Per-task ISSUE and AWAIT behaviour, dispatched in a fixed priority order

use log::{debug, error, info, warn};

use crate::classifier::{
    contains, contains_all, contains_any, describe_failure, extract_gain, is_server_close,
};
use crate::modem::{
    ModemPort, APP_INCLUDE_DEBUG, APP_RELAY_ON, APP_STATUS_OK, CMD_CLOSE_TCP, CMD_DISABLE_ECHO,
    CMD_JOIN_NETWORK, CMD_LIST_NETWORKS, CMD_PING, CMD_QUERY_AP_STATUS, CMD_QUERY_MODE,
    CMD_QUERY_STATIC_IP, CMD_SET_STATIC_IP, CMD_SET_STATION_MODE, HTTP_SERVICE_UNAVAILABLE,
    HTTP_STATUS_OK, RESP_ALREADY_CONNECTED, RESP_CONNECTED, RESP_DATA_PREFIX,
    RESP_NETWORK_LIST_PREFIX, RESP_NOT_CONNECTED, RESP_OK, RESP_READY_PROMPT, RESP_SEND_OK,
    RESP_STATIC_IP_PREFIX, RESP_STATION_MODE, RESP_WIFI_MODE_PREFIX,
};
use crate::request_builder::{build_long_poll_request, build_status_json, DebugReport};
use crate::retry::RetryAction;
use crate::scheduler::Scheduler;
use crate::serial_inbox::SerialInbox;
use crate::system_state::StatusFlags;
use crate::task_queue::Task;
use crate::template::{fill, TemplateError};

/// Order in which handlers are offered the head task or the pending response.
/// The first handler that claims the tick wins.
pub const DISPATCH_PRIORITY: [Task; 16] = [
    Task::DisableEcho,
    Task::QueryStatusAndConnect,
    Task::QueryConnectionStatus,
    Task::ConnectToNetwork,
    Task::ConnectToServer,
    Task::AnnouncePayloadLength,
    Task::SendPayloadAwaitResponse,
    Task::QueryWifiMode,
    Task::SetStationMode,
    Task::QueryOwnIp,
    Task::SetOwnIp,
    Task::CloseConnection,
    Task::ScanNetworks,
    Task::ProbeServerAvailability,
    Task::EstablishLongPoll,
    Task::AwaitLongPoll,
];

/// Long-poll timeout after the server answered with something unusable
pub const LONG_POLL_RETRY_AFTER_INVALID_SECS: u16 = 15;

/// Seconds to wait for a classified response before the retry fires
pub const fn retry_timeout_secs(task: Task) -> u16 {
    match task {
        Task::DisableEcho
        | Task::QueryStatusAndConnect
        | Task::QueryConnectionStatus
        | Task::AnnouncePayloadLength
        | Task::QueryWifiMode
        | Task::SetStationMode
        | Task::SetOwnIp => 2,
        Task::QueryOwnIp | Task::ProbeServerAvailability => 5,
        Task::ConnectToNetwork | Task::ConnectToServer | Task::SendPayloadAwaitResponse => 10,
        Task::CloseConnection | Task::ScanNetworks => 20,
        Task::AwaitLongPoll => 330,
        // never transmits
        Task::EstablishLongPoll => 0,
    }
}

/// What the armed retry does on expiry: final steps of a piped request
/// rebuild the whole request, everything else is simply sent again.
pub const fn retry_action(task: Task) -> RetryAction {
    match task {
        Task::SendPayloadAwaitResponse | Task::AwaitLongPoll => RetryAction::ResendPipedRequest(task),
        _ => RetryAction::Reissue(task),
    }
}

// Outcome of classifying one response
enum Verdict {
    Success,
    // success, then the given task jumps the queue
    SuccessThen(Task),
    Failure,
}

impl Scheduler {
    /// Offer the tick to the handlers in priority order. `head` is the task
    /// eligible for ISSUE, `response` the completed receive buffer if any.
    pub(crate) fn dispatch(
        &mut self,
        head: Option<Task>,
        response: Option<&[u8]>,
        inbox: &SerialInbox,
        modem: &mut dyn ModemPort,
    ) {
        if head.is_none() && response.is_none() {
            return;
        }

        for task in DISPATCH_PRIORITY {
            if head == Some(task) {
                self.issue(task, inbox, modem);
                return;
            }
            if let Some(response) = response {
                if self.sent.contains(task) {
                    self.await_response(task, response, inbox);
                    return;
                }
            }
        }
    }

    pub(crate) fn fire_retry(&mut self, action: RetryAction, inbox: &SerialInbox, modem: &mut dyn ModemPort) {
        match action {
            RetryAction::Reissue(task) => match self.render_command(task) {
                Some(command) => {
                    debug!("⏱️ No response to {}, sending again", task);
                    self.transmit(task, &command, inbox, modem);
                }
                None => {
                    self.retry.cancel();
                    self.abandon(task);
                }
            },
            RetryAction::ResendPipedRequest(final_task) => {
                warn!("⏱️ No response to {}, re-sending the whole request", final_task);
                self.retry.cancel();
                self.sent.clear();
                self.queue.remove_all(Task::CloseConnection);
                self.queue.remove_all(Task::AnnouncePayloadLength);
                self.queue.remove_all(final_task);
                // drop the stale link before opening a new one
                self.enqueue(Task::CloseConnection);
                self.enqueue(Task::ConnectToServer);
                self.enqueue(Task::AnnouncePayloadLength);
                self.enqueue(final_task);
            }
        }
    }

    fn issue(&mut self, task: Task, inbox: &SerialInbox, modem: &mut dyn ModemPort) {
        if task == Task::EstablishLongPoll {
            self.establish_long_poll(inbox);
            return;
        }

        let Some(command) = self.render_command(task) else {
            self.abandon(task);
            return;
        };
        debug!("➡️ Issuing {}", task);
        self.retry.arm(retry_action(task), retry_timeout_secs(task));
        self.transmit(task, &command, inbox, modem);
    }

    // Every transmit starts from an empty receive buffer and replaces the sent set
    fn transmit(&mut self, task: Task, command: &str, inbox: &SerialInbox, modem: &mut dyn ModemPort) {
        inbox.clear();
        self.sent.clear();
        self.sent.insert(task);
        self.retry.restart_elapsed();
        if let Err(e) = modem.transmit(command.as_bytes()) {
            warn!("⚠️ Transmit of {} failed: {:?}", task, e);
        }
    }

    /// Bytes to send for `task`. `None` when there is nothing to send: the
    /// piped slot is empty, no static IP is configured, or a template failed.
    fn render_command(&self, task: Task) -> Option<String> {
        let config = &self.config;
        let rendered: Result<String, TemplateError> = match task {
            Task::DisableEcho => Ok(CMD_DISABLE_ECHO.to_string()),
            Task::ScanNetworks => Ok(CMD_LIST_NETWORKS.to_string()),
            Task::QueryStatusAndConnect | Task::QueryConnectionStatus => {
                Ok(CMD_QUERY_AP_STATUS.to_string())
            }
            Task::ConnectToNetwork => fill(
                CMD_JOIN_NETWORK,
                &[config.access_point_name.as_str(), config.access_point_password.as_str()],
            ),
            Task::QueryOwnIp => Ok(CMD_QUERY_STATIC_IP.to_string()),
            Task::SetOwnIp => fill(CMD_SET_STATIC_IP, &[config.static_ip.as_deref()?]),
            Task::QueryWifiMode => Ok(CMD_QUERY_MODE.to_string()),
            Task::SetStationMode => Ok(CMD_SET_STATION_MODE.to_string()),
            Task::CloseConnection => Ok(CMD_CLOSE_TCP.to_string()),
            Task::ProbeServerAvailability => fill(CMD_PING, &[config.server_address.as_str()]),
            Task::ConnectToServer => return self.piped.open_command().map(str::to_string),
            Task::AnnouncePayloadLength => return self.piped.announce_command().map(str::to_string),
            Task::SendPayloadAwaitResponse | Task::AwaitLongPoll => {
                return self.piped.payload().map(str::to_string)
            }
            Task::EstablishLongPoll => return None,
        };

        match rendered {
            Ok(command) => Some(command),
            Err(e) => {
                error!("❌ Failed to build command for {}: {}", task, e);
                None
            }
        }
    }

    /// A task with nothing to send is dropped and counted as a failure.
    /// Losing the long-poll await would end the long-poll loop, so it is
    /// re-established.
    fn abandon(&mut self, task: Task) {
        error!("❌ Nothing to send for {}, dropping it", task);
        self.queue.remove_all(task);
        self.sent.remove(task);
        self.errors.record_failure(task, &[]);
        if task == Task::AwaitLongPoll {
            self.enqueue(Task::EstablishLongPoll);
        }
    }

    fn await_response(&mut self, task: Task, response: &[u8], inbox: &SerialInbox) {
        if task == Task::AwaitLongPoll {
            self.await_long_poll(response, inbox);
            return;
        }

        let verdict = self.classify(task, response);
        self.sent.remove(task);
        match verdict {
            Verdict::Success => self.complete(task),
            Verdict::SuccessThen(follow_up) => {
                self.complete(task);
                debug!("↪️ {} needs {} first", task, follow_up);
                self.enqueue_urgent(follow_up);
            }
            Verdict::Failure => self.fail(task, response),
        }
    }

    fn classify(&mut self, task: Task, response: &[u8]) -> Verdict {
        let verdict_of = |ok: bool| if ok { Verdict::Success } else { Verdict::Failure };

        match task {
            Task::DisableEcho | Task::SetStationMode | Task::SetOwnIp => {
                verdict_of(contains(response, RESP_OK))
            }
            Task::QueryStatusAndConnect | Task::QueryConnectionStatus => {
                let joined = contains(response, &self.config.access_point_name);
                self.flags.set(StatusFlags::NETWORK_CONNECTED, joined);
                if joined {
                    Verdict::Success
                } else if !contains(response, RESP_NOT_CONNECTED) {
                    Verdict::Failure
                } else if task == Task::QueryStatusAndConnect {
                    Verdict::SuccessThen(Task::ConnectToNetwork)
                } else {
                    Verdict::Success
                }
            }
            Task::ConnectToNetwork => {
                let joined = contains(response, RESP_OK);
                if joined {
                    info!("📶 Joined access point '{}'", self.config.access_point_name);
                    self.flags.insert(StatusFlags::NETWORK_CONNECTED);
                }
                verdict_of(joined)
            }
            Task::ConnectToServer => verdict_of(
                contains_all(response, &[RESP_CONNECTED, RESP_OK])
                    || contains(response, RESP_ALREADY_CONNECTED),
            ),
            Task::AnnouncePayloadLength => verdict_of(contains(response, RESP_READY_PROMPT)),
            Task::SendPayloadAwaitResponse => {
                verdict_of(contains_all(response, &[RESP_SEND_OK, RESP_DATA_PREFIX]))
            }
            Task::QueryWifiMode => {
                let mode_prefix = format!("{}{}", RESP_WIFI_MODE_PREFIX, RESP_STATION_MODE);
                if !contains(response, RESP_WIFI_MODE_PREFIX) {
                    Verdict::Failure
                } else if contains(response, &mode_prefix) {
                    Verdict::Success
                } else {
                    Verdict::SuccessThen(Task::SetStationMode)
                }
            }
            Task::QueryOwnIp => match self.config.static_ip.as_deref() {
                Some(own_ip) if contains(response, own_ip) => Verdict::Success,
                _ if !contains(response, RESP_STATIC_IP_PREFIX) => Verdict::Failure,
                Some(_) => Verdict::SuccessThen(Task::SetOwnIp),
                None => Verdict::Success,
            },
            // the modem answers ERROR when no link is open, which is fine too
            Task::CloseConnection => Verdict::Success,
            Task::ScanNetworks => {
                if !contains(response, RESP_NETWORK_LIST_PREFIX) {
                    return Verdict::Failure;
                }
                if let Some(gain) = extract_gain(response, &self.config.access_point_name) {
                    debug!("📡 Access point gain '{}'", gain);
                    self.gain = gain;
                }
                Verdict::Success
            }
            Task::ProbeServerAvailability => {
                let reachable = contains(response, RESP_OK);
                self.flags.set(StatusFlags::SERVER_AVAILABLE, reachable);
                verdict_of(reachable)
            }
            // handled before classification
            Task::EstablishLongPoll | Task::AwaitLongPoll => Verdict::Failure,
        }
    }

    fn complete(&mut self, task: Task) {
        self.retry.cancel();
        self.errors.record_success();
        if self.queue.peek_head() == Some(task) {
            self.queue.remove_head();
        } else {
            self.queue.remove_all(task);
        }
        self.history.record(task);
        debug!("✅ {} done", task);
    }

    // The task stays at the head; the still-armed retry sends it again
    fn fail(&mut self, task: Task, response: &[u8]) {
        self.errors.record_failure(task, response);
        warn!(
            "⚠️ {} failed, {} ({} in a row): {}",
            task,
            describe_failure(response),
            self.errors.consecutive(),
            self.errors.snapshot().unwrap_or_default()
        );
    }

    /// Build the status request and queue it as a piped request ending in the
    /// long-poll await. Waits behind any other piped request still in flight.
    fn establish_long_poll(&mut self, inbox: &SerialInbox) {
        self.queue.remove_all(Task::EstablishLongPoll);
        if self.piped_request_pending() {
            debug!("⏸️ Another request in flight, long-poll deferred");
            self.enqueue(Task::EstablishLongPoll);
            return;
        }

        // the snapshot goes out with at most one request
        let usart_data = self.errors.take_snapshot();
        let debug_report = if self.flags.contains(StatusFlags::DEBUG_REQUESTED) {
            Some(DebugReport {
                lifetime_errors: self.errors.lifetime(),
                line_errors: inbox.line_errors(),
                last_error_task: self.errors.take_last_failed_task(),
                usart_data,
            })
        } else {
            None
        };

        let request = build_status_json(&self.gain, debug_report.as_ref())
            .and_then(|status| build_long_poll_request(&self.config.server_address, &status))
            .and_then(|request| self.prepare_piped_request(request, Task::AwaitLongPoll));

        match request {
            Ok(()) => {
                self.history.record(Task::EstablishLongPoll);
                debug!(
                    "🔁 Long-poll prepared{}",
                    if debug_report.is_some() { " with debug info" } else { "" }
                );
            }
            Err(e) => {
                error!("❌ Failed to build long-poll request: {}", e);
                self.errors.record_failure(Task::EstablishLongPoll, &[]);
                self.enqueue(Task::EstablishLongPoll);
            }
        }
    }

    fn await_long_poll(&mut self, response: &[u8], inbox: &SerialInbox) {
        let fragment = contains_any(response, &[HTTP_STATUS_OK, RESP_SEND_OK])
            && !contains(response, APP_STATUS_OK)
            && !contains(response, HTTP_SERVICE_UNAVAILABLE);
        if fragment {
            debug!("🧩 Partial long-poll response, waiting for the rest");
            inbox.clear();
            return;
        }

        self.sent.remove(Task::AwaitLongPoll);
        if contains(response, APP_STATUS_OK) {
            let debug_requested = contains(response, APP_INCLUDE_DEBUG);
            let relay_on = contains(response, APP_RELAY_ON);
            if relay_on != self.flags.contains(StatusFlags::RELAY_ON) {
                info!("🔌 Server switched relay {}", if relay_on { "on" } else { "off" });
            }
            self.flags.set(StatusFlags::DEBUG_REQUESTED, debug_requested);
            self.flags.set(StatusFlags::RELAY_ON, relay_on);
            self.flags.insert(StatusFlags::SERVER_AVAILABLE);
            self.complete(Task::AwaitLongPoll);
            self.enqueue(Task::EstablishLongPoll);
        } else {
            if is_server_close(response) {
                warn!("🔌 Server closed the long-poll connection");
            }
            self.flags.remove(StatusFlags::SERVER_AVAILABLE);
            self.retry.shorten_timeout(LONG_POLL_RETRY_AFTER_INVALID_SECS);
            self.fail(Task::AwaitLongPoll, response);
        }
    }
}
