// Retry Module
// Single-slot resend timer: arming a new descriptor silently replaces the old one

use crate::task_queue::Task;

/// Coarse tick period is ~0.1 s
pub const TICKS_PER_SECOND: u32 = 10;

/// What to do when a retry expires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Transmit the task's command again
    Reissue(Task),
    /// Tear down and re-queue the full connect / announce / payload sequence
    /// ending in the given task
    ResendPipedRequest(Task),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDescriptor {
    pub action: RetryAction,
    pub timeout_secs: u16,
    pub elapsed_ticks: u32,
}

impl RetryDescriptor {
    pub fn is_expired(&self) -> bool {
        self.elapsed_ticks >= u32::from(self.timeout_secs) * TICKS_PER_SECOND
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrySlot {
    armed: Option<RetryDescriptor>,
}

impl RetrySlot {
    pub const fn new() -> Self {
        Self { armed: None }
    }

    pub fn arm(&mut self, action: RetryAction, timeout_secs: u16) {
        self.armed = Some(RetryDescriptor {
            action,
            timeout_secs,
            elapsed_ticks: 0,
        });
    }

    pub fn cancel(&mut self) {
        self.armed = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn current(&self) -> Option<&RetryDescriptor> {
        self.armed.as_ref()
    }

    /// A fresh transmit restarts the elapsed count of the armed retry
    pub fn restart_elapsed(&mut self) {
        if let Some(descriptor) = self.armed.as_mut() {
            descriptor.elapsed_ticks = 0;
        }
    }

    /// Replace the timeout of the armed retry, keeping its elapsed count
    pub fn shorten_timeout(&mut self, timeout_secs: u16) {
        if let Some(descriptor) = self.armed.as_mut() {
            descriptor.timeout_secs = timeout_secs;
        }
    }

    pub fn tick(&mut self) {
        if let Some(descriptor) = self.armed.as_mut() {
            descriptor.elapsed_ticks = descriptor.elapsed_ticks.saturating_add(1);
        }
    }

    /// The action due now, if the armed retry has expired. The slot stays
    /// armed; the action decides whether it is re-armed or cancelled.
    pub fn due(&self) -> Option<RetryAction> {
        self.armed
            .filter(RetryDescriptor::is_expired)
            .map(|descriptor| descriptor.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_expires_after_timeout_ticks() {
        let mut slot = RetrySlot::new();
        slot.arm(RetryAction::Reissue(Task::DisableEcho), 2);

        for _ in 0..(2 * TICKS_PER_SECOND - 1) {
            slot.tick();
        }
        assert_eq!(slot.due(), None);

        slot.tick();
        assert_eq!(slot.due(), Some(RetryAction::Reissue(Task::DisableEcho)));
    }

    #[test]
    fn test_arming_replaces_previous_descriptor() {
        let mut slot = RetrySlot::new();
        slot.arm(RetryAction::Reissue(Task::ScanNetworks), 20);
        slot.tick();
        slot.arm(RetryAction::ResendPipedRequest(Task::AwaitLongPoll), 330);

        let current = slot.current().unwrap();
        assert_eq!(current.action, RetryAction::ResendPipedRequest(Task::AwaitLongPoll));
        assert_eq!(current.elapsed_ticks, 0);
    }

    #[test]
    fn test_shorten_timeout_keeps_elapsed() {
        let mut slot = RetrySlot::new();
        slot.arm(RetryAction::ResendPipedRequest(Task::AwaitLongPoll), 330);
        for _ in 0..(20 * TICKS_PER_SECOND) {
            slot.tick();
        }
        assert_eq!(slot.due(), None);

        slot.shorten_timeout(15);
        assert!(slot.due().is_some());
    }

    #[test]
    fn test_unarmed_slot_never_due() {
        let mut slot = RetrySlot::new();
        slot.tick();
        assert_eq!(slot.due(), None);
        slot.shorten_timeout(1);
        slot.restart_elapsed();
        assert!(!slot.is_armed());
    }
}
