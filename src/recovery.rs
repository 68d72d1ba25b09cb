// Recovery Module
// Failure accounting, the soft reset / hardware restart ladder, idle maintenance and modem power sequencing

use log::{info, warn};

use crate::classifier::sanitize_snapshot;
use crate::modem::PowerLine;
use crate::retry::TICKS_PER_SECOND;
use crate::task_queue::{Task, TaskQueue};

/// Consecutive classified failures that force a soft reset
pub const SOFT_RESET_ERROR_THRESHOLD: u8 = 10;
/// Soft resets that force a hardware restart
pub const HARDWARE_RESTART_SOFT_RESET_THRESHOLD: u8 = 5;

pub const CONNECTIVITY_PROBE_PERIOD_TICKS: u32 = 30 * TICKS_PER_SECOND;
pub const NETWORK_RESCAN_PERIOD_TICKS: u32 = 600 * TICKS_PER_SECOND;

pub const POWER_OFF_SETTLE_TICKS: u32 = TICKS_PER_SECOND;
pub const POWER_WARM_UP_TICKS: u32 = 5 * TICKS_PER_SECOND;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorState {
    consecutive: u8,
    lifetime: u32,
    last_failed_task: Option<Task>,
    snapshot: Option<String>,
}

impl ErrorState {
    pub const fn new() -> Self {
        Self {
            consecutive: 0,
            lifetime: 0,
            last_failed_task: None,
            snapshot: None,
        }
    }

    /// Count a classified failure and keep a sanitised copy of what the modem said
    pub fn record_failure(&mut self, task: Task, response: &[u8]) {
        self.consecutive = self.consecutive.saturating_add(1);
        self.lifetime = self.lifetime.saturating_add(1);
        self.last_failed_task = Some(task);
        self.snapshot = Some(sanitize_snapshot(response));
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u8 {
        self.consecutive
    }

    pub fn lifetime(&self) -> u32 {
        self.lifetime
    }

    pub fn last_failed_task(&self) -> Option<Task> {
        self.last_failed_task
    }

    pub fn snapshot(&self) -> Option<&str> {
        self.snapshot.as_deref()
    }

    pub fn take_snapshot(&mut self) -> Option<String> {
        self.snapshot.take()
    }

    pub fn take_last_failed_task(&mut self) -> Option<Task> {
        self.last_failed_task.take()
    }

    /// Soft reset: the streak and the snapshot go, lifetime totals stay
    pub fn reset_streak(&mut self) {
        self.consecutive = 0;
        self.snapshot = None;
    }
}

/// Next rung of the recovery ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    None,
    SoftReset,
    HardwareRestart,
}

/// Decide the next recovery step from the failure streak, queue pressure and
/// the number of soft resets already performed.
pub fn evaluate_escalation(errors: &ErrorState, queue: &TaskQueue, soft_resets: u8) -> Escalation {
    if soft_resets >= HARDWARE_RESTART_SOFT_RESET_THRESHOLD {
        Escalation::HardwareRestart
    } else if errors.consecutive() >= SOFT_RESET_ERROR_THRESHOLD || queue.is_near_full() {
        Escalation::SoftReset
    } else {
        Escalation::None
    }
}

/// Countdowns for the periodic work injected while the pipeline is idle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceTimers {
    probe_ticks_left: u32,
    rescan_ticks_left: u32,
}

impl MaintenanceTimers {
    /// The first connectivity probe is due as soon as the pipeline idles
    pub const fn new() -> Self {
        Self {
            probe_ticks_left: 0,
            rescan_ticks_left: NETWORK_RESCAN_PERIOD_TICKS,
        }
    }

    pub fn tick(&mut self) {
        self.probe_ticks_left = self.probe_ticks_left.saturating_sub(1);
        self.rescan_ticks_left = self.rescan_ticks_left.saturating_sub(1);
    }

    /// Tasks due now. Nothing is injected unless the queue is empty, and the
    /// rescan waits behind a probe that was injected on the same call.
    pub fn due_tasks(&mut self, queue_is_empty: bool) -> &'static [Task] {
        if !queue_is_empty {
            return &[];
        }
        if self.probe_ticks_left == 0 {
            self.probe_ticks_left = CONNECTIVITY_PROBE_PERIOD_TICKS;
            return &[Task::QueryConnectionStatus, Task::ProbeServerAvailability];
        }
        if self.rescan_ticks_left == 0 {
            self.rescan_ticks_left = NETWORK_RESCAN_PERIOD_TICKS;
            return &[Task::ScanNetworks];
        }
        &[]
    }
}

impl Default for MaintenanceTimers {
    fn default() -> Self {
        Self::new()
    }
}

/// Modem power gating: off for at least a second, then on, then a warm-up
/// before the pipeline may talk to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerSequencer {
    off_ticks: u32,
    warm_up_left: u32,
}

impl PowerSequencer {
    pub const fn new() -> Self {
        Self {
            off_ticks: 0,
            warm_up_left: POWER_WARM_UP_TICKS,
        }
    }

    pub fn tick(&mut self, modem_enabled: bool) {
        if !modem_enabled {
            self.off_ticks = self.off_ticks.saturating_add(1);
        }
        self.warm_up_left = self.warm_up_left.saturating_sub(1);
    }

    /// Switch the modem off and restart the sequence
    pub fn power_down(&mut self, power: &mut dyn PowerLine) {
        power.set_enabled(false);
        self.off_ticks = 0;
        warn!("🔌 Modem powered down");
    }

    /// Drive the line; true once the modem is on and warmed up
    pub fn poll(&mut self, power: &mut dyn PowerLine) -> bool {
        if power.is_enabled() {
            return self.warm_up_left == 0;
        }
        if self.off_ticks >= POWER_OFF_SETTLE_TICKS {
            power.set_enabled(true);
            self.off_ticks = 0;
            self.warm_up_left = POWER_WARM_UP_TICKS;
            info!("🔌 Modem powered up, warming up");
        }
        false
    }
}

impl Default for PowerSequencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Line(bool);

    impl PowerLine for Line {
        fn set_enabled(&mut self, enabled: bool) {
            self.0 = enabled;
        }

        fn is_enabled(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn test_failure_and_success_accounting() {
        let mut errors = ErrorState::new();
        errors.record_failure(Task::DisableEcho, b"\r\nERROR\r\n");
        errors.record_failure(Task::DisableEcho, b"busy p...");
        assert_eq!(errors.consecutive(), 2);
        assert_eq!(errors.lifetime(), 2);
        assert_eq!(errors.last_failed_task(), Some(Task::DisableEcho));
        assert_eq!(errors.snapshot(), Some("busyap..."));

        errors.record_success();
        assert_eq!(errors.consecutive(), 0);
        assert_eq!(errors.lifetime(), 2);
    }

    #[test]
    fn test_escalation_ladder() {
        let mut errors = ErrorState::new();
        let mut queue = TaskQueue::new();
        assert_eq!(evaluate_escalation(&errors, &queue, 0), Escalation::None);

        for _ in 0..SOFT_RESET_ERROR_THRESHOLD {
            errors.record_failure(Task::ScanNetworks, b"");
        }
        assert_eq!(evaluate_escalation(&errors, &queue, 0), Escalation::SoftReset);
        assert_eq!(
            evaluate_escalation(&errors, &queue, HARDWARE_RESTART_SOFT_RESET_THRESHOLD),
            Escalation::HardwareRestart
        );

        errors.reset_streak();
        for _ in 0..crate::task_queue::TASK_QUEUE_CAPACITY - 1 {
            queue.enqueue_tail(Task::ScanNetworks).unwrap();
        }
        assert_eq!(evaluate_escalation(&errors, &queue, 0), Escalation::SoftReset);
    }

    #[test]
    fn test_maintenance_only_when_idle() {
        let mut timers = MaintenanceTimers::new();
        assert!(timers.due_tasks(false).is_empty());
        assert_eq!(
            timers.due_tasks(true),
            &[Task::QueryConnectionStatus, Task::ProbeServerAvailability]
        );
        assert!(timers.due_tasks(true).is_empty());

        for _ in 0..CONNECTIVITY_PROBE_PERIOD_TICKS {
            timers.tick();
        }
        assert_eq!(timers.due_tasks(true).len(), 2);
    }

    #[test]
    fn test_rescan_every_ten_minutes() {
        let mut timers = MaintenanceTimers::new();
        timers.due_tasks(true);

        let mut rescans = 0;
        for _ in 0..NETWORK_RESCAN_PERIOD_TICKS {
            timers.tick();
            if timers.due_tasks(true) == [Task::ScanNetworks] {
                rescans += 1;
            }
        }
        assert_eq!(rescans, 1);
    }

    #[test]
    fn test_power_sequence() {
        let mut power = PowerSequencer::new();
        let mut line = Line(true);
        power.power_down(&mut line);
        assert!(!line.0);

        for _ in 0..POWER_OFF_SETTLE_TICKS - 1 {
            power.tick(line.0);
            assert!(!power.poll(&mut line));
        }
        power.tick(line.0);
        assert!(!power.poll(&mut line));
        assert!(line.0);

        for _ in 0..POWER_WARM_UP_TICKS - 1 {
            power.tick(line.0);
            assert!(!power.poll(&mut line));
        }
        power.tick(line.0);
        assert!(power.poll(&mut line));
    }
}
