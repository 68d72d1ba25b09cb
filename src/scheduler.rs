// Scheduler Module
// Owns every piece of pipeline state and runs one cooperative loop iteration at a time

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::classifier::AccessPointGain;
use crate::config::DeviceConfig;
use crate::led_manager::StatusLeds;
use crate::modem::{Indicators, ModemPort, PowerLine, SystemControl};
use crate::recovery::{evaluate_escalation, ErrorState, Escalation, MaintenanceTimers, PowerSequencer};
use crate::request_builder::PipedRequest;
use crate::retry::RetrySlot;
use crate::serial_inbox::SerialInbox;
use crate::system_state::StatusFlags;
use crate::task_queue::{SentTasks, Task, TaskHistory, TaskQueue};
use crate::template::TemplateError;

/// Everything the scheduler drives on the board
pub trait Board: ModemPort + PowerLine + Indicators + SystemControl {}

impl<T> Board for T where T: ModemPort + PowerLine + Indicators + SystemControl {}

/// Tasks that make up a piped request, in issue order after the open step
pub(crate) const PIPED_TASKS: [Task; 4] = [
    Task::ConnectToServer,
    Task::AnnouncePayloadLength,
    Task::SendPayloadAwaitResponse,
    Task::AwaitLongPoll,
];

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("a piped request is already pending")]
    Busy,
    #[error("failed to build request: {0}")]
    Template(#[from] TemplateError),
}

pub struct Scheduler {
    pub(crate) config: DeviceConfig,
    pub(crate) queue: TaskQueue,
    pub(crate) history: TaskHistory,
    pub(crate) sent: SentTasks,
    pub(crate) retry: RetrySlot,
    pub(crate) piped: PipedRequest,
    pub(crate) flags: StatusFlags,
    pub(crate) gain: AccessPointGain,
    pub(crate) errors: ErrorState,
    soft_resets: u8,
    maintenance: MaintenanceTimers,
    power: PowerSequencer,
    leds: StatusLeds,
}

impl Scheduler {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            queue: TaskQueue::new(),
            history: TaskHistory::new(),
            sent: SentTasks::new(),
            retry: RetrySlot::new(),
            piped: PipedRequest::new(),
            flags: StatusFlags::empty(),
            gain: AccessPointGain::unknown(),
            errors: ErrorState::new(),
            soft_resets: 0,
            maintenance: MaintenanceTimers::new(),
            power: PowerSequencer::new(),
            leds: StatusLeds::new(),
        }
    }

    /// Power the modem down and queue the boot sequence
    pub fn start(&mut self, board: &mut impl Board) {
        info!(
            "🚀 Pipeline starting - AP '{}', server {}:{}",
            self.config.access_point_name, self.config.server_address, self.config.server_port
        );
        self.power.power_down(board);

        self.enqueue(Task::DisableEcho);
        self.enqueue(Task::QueryWifiMode);
        if self.config.static_ip.is_some() {
            self.enqueue(Task::QueryOwnIp);
        }
        self.enqueue(Task::QueryStatusAndConnect);
        self.enqueue(Task::ScanNetworks);
        self.enqueue(Task::EstablishLongPoll);
    }

    /// Coarse tick, ~0.1 s
    pub fn tick(&mut self, board: &impl Board) {
        self.retry.tick();
        self.maintenance.tick();
        self.power.tick(board.is_enabled());
        self.leds.tick();
    }

    /// One foreground iteration: classify or time out, dispatch, maintain,
    /// escalate.
    pub fn run_once(&mut self, inbox: &SerialInbox, board: &mut impl Board) {
        if !self.power.poll(board) {
            self.leds.apply(&self.flags, board);
            return;
        }

        // taking the response consumes the inbox completion flag
        let response = inbox.take_response();
        if response.is_none() {
            if let Some(action) = self.retry.due() {
                self.fire_retry(action, inbox, board);
            }
        }

        let head = if self.retry.is_armed() {
            None
        } else {
            self.queue.peek_head()
        };
        self.dispatch(head, response.as_deref(), inbox, board);

        for &task in self.maintenance.due_tasks(self.queue.is_empty()) {
            debug!("🔧 Maintenance: queueing {}", task);
            self.enqueue(task);
        }

        self.leds.apply(&self.flags, board);

        match evaluate_escalation(&self.errors, &self.queue, self.soft_resets) {
            Escalation::None => {}
            Escalation::SoftReset => self.soft_reset(inbox),
            Escalation::HardwareRestart => {
                error!(
                    "💥 {} soft resets did not recover the modem, restarting",
                    self.soft_resets
                );
                board.restart();
            }
        }
    }

    /// Queue a one-shot request whose response completes SendPayloadAwaitResponse.
    /// Only one piped request exists at a time.
    pub fn submit_request(&mut self, body: String) -> Result<(), SubmitError> {
        if self.piped_request_pending() {
            return Err(SubmitError::Busy);
        }
        self.prepare_piped_request(body, Task::SendPayloadAwaitResponse)?;
        info!("📤 Request queued");
        Ok(())
    }

    pub fn enqueue(&mut self, task: Task) {
        if let Err(e) = self.queue.enqueue_tail(task) {
            warn!("⚠️ {}", e);
        }
    }

    pub(crate) fn enqueue_urgent(&mut self, task: Task) {
        if let Err(e) = self.queue.enqueue_head(task) {
            warn!("⚠️ {}", e);
        }
    }

    /// Fill the piped slots and queue the open / announce / final steps
    pub(crate) fn prepare_piped_request(&mut self, payload: String, final_task: Task) -> Result<(), TemplateError> {
        self.piped
            .prepare(&self.config.server_address, self.config.server_port, payload)?;
        self.enqueue(Task::ConnectToServer);
        self.enqueue(Task::AnnouncePayloadLength);
        self.enqueue(final_task);
        Ok(())
    }

    pub(crate) fn piped_request_pending(&self) -> bool {
        PIPED_TASKS
            .iter()
            .any(|task| self.queue.contains(*task) || self.sent.contains(*task))
    }

    /// Drop all in-flight protocol state and start over from a connectivity check
    fn soft_reset(&mut self, inbox: &SerialInbox) {
        self.soft_resets = self.soft_resets.saturating_add(1);
        error!(
            "🔄 Soft reset #{} ({} consecutive errors, queue length {})",
            self.soft_resets,
            self.errors.consecutive(),
            self.queue.len()
        );

        self.queue.clear();
        self.piped.clear();
        inbox.clear();
        self.retry.cancel();
        self.sent.clear();
        self.flags = StatusFlags::empty();
        self.errors.reset_streak();

        self.enqueue(Task::QueryStatusAndConnect);
        self.enqueue(Task::EstablishLongPoll);
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn history(&self) -> &TaskHistory {
        &self.history
    }

    pub fn sent(&self) -> &SentTasks {
        &self.sent
    }

    pub fn retry(&self) -> &RetrySlot {
        &self.retry
    }

    pub fn piped(&self) -> &PipedRequest {
        &self.piped
    }

    pub fn flags(&self) -> StatusFlags {
        self.flags
    }

    pub fn gain(&self) -> AccessPointGain {
        self.gain
    }

    pub fn errors(&self) -> &ErrorState {
        &self.errors
    }

    pub fn soft_resets(&self) -> u8 {
        self.soft_resets
    }
}
