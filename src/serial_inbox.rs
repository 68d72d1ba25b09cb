// Serial Inbox Module
// Receive buffer shared between the UART producer and the foreground loop
//
// Producers only append bytes, flag idle gaps and tally line errors. The
// foreground loop only takes completed responses and clears the buffer.
// Every access goes through a critical section.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

pub const RECEIVE_BUFFER_CAPACITY: usize = 1000;

/// UART line error categories, counted only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineError {
    Overrun,
    IdleLine,
    Noise,
    Framing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineErrorCounts {
    pub overrun: u16,
    pub idle_line: u16,
    pub noise: u16,
    pub framing: u16,
}

impl LineErrorCounts {
    fn increment(&mut self, error: LineError) {
        let counter = match error {
            LineError::Overrun => &mut self.overrun,
            LineError::IdleLine => &mut self.idle_line,
            LineError::Noise => &mut self.noise,
            LineError::Framing => &mut self.framing,
        };
        *counter = counter.wrapping_add(1);
    }
}

struct RxState {
    buffer: [u8; RECEIVE_BUFFER_CAPACITY],
    len: usize,
    bytes_since_gap: usize,
    complete: bool,
    line_errors: LineErrorCounts,
}

impl RxState {
    const fn new() -> Self {
        Self {
            buffer: [0; RECEIVE_BUFFER_CAPACITY],
            len: 0,
            bytes_since_gap: 0,
            complete: false,
            line_errors: LineErrorCounts {
                overrun: 0,
                idle_line: 0,
                noise: 0,
                framing: 0,
            },
        }
    }
}

pub struct SerialInbox {
    state: Mutex<CriticalSectionRawMutex, RefCell<RxState>>,
}

impl SerialInbox {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(RxState::new())),
        }
    }

    // --- producer side ---

    /// Append one received byte. Bytes beyond capacity are dropped and
    /// counted as overruns.
    pub fn push_byte(&self, byte: u8) {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            state.bytes_since_gap += 1;
            if state.len < RECEIVE_BUFFER_CAPACITY {
                let len = state.len;
                state.buffer[len] = byte;
                state.len += 1;
            } else {
                state.line_errors.increment(LineError::Overrun);
            }
        });
    }

    pub fn push_bytes(&self, bytes: &[u8]) {
        for &byte in bytes {
            self.push_byte(byte);
        }
    }

    /// The line went quiet. A response counts as complete only if more than
    /// one byte arrived since the previous gap; a lone byte is line noise.
    pub fn mark_idle_gap(&self) -> bool {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            if state.bytes_since_gap > 1 {
                state.complete = true;
            }
            state.bytes_since_gap = 0;
            state.complete
        })
    }

    pub fn record_line_error(&self, error: LineError) {
        self.state
            .lock(|cell| cell.borrow_mut().line_errors.increment(error));
    }

    // --- foreground side ---

    /// Read-then-clear of the completion signal. Returns a copy of the whole
    /// buffer accumulated since the last clear.
    pub fn take_response(&self) -> Option<Vec<u8>> {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            if !state.complete {
                return None;
            }
            state.complete = false;
            Some(state.buffer[..state.len].to_vec())
        })
    }

    /// Drop buffered bytes and any pending completion
    pub fn clear(&self) {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            state.len = 0;
            state.bytes_since_gap = 0;
            state.complete = false;
        });
    }

    pub fn buffered_len(&self) -> usize {
        self.state.lock(|cell| cell.borrow().len)
    }

    pub fn line_errors(&self) -> LineErrorCounts {
        self.state.lock(|cell| cell.borrow().line_errors)
    }
}

impl Default for SerialInbox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_completes_on_idle_gap() {
        let inbox = SerialInbox::new();
        inbox.push_bytes(b"\r\nOK\r\n");
        assert_eq!(inbox.take_response(), None);

        assert!(inbox.mark_idle_gap());
        assert_eq!(inbox.take_response().as_deref(), Some(&b"\r\nOK\r\n"[..]));
        assert_eq!(inbox.take_response(), None);
    }

    #[test]
    fn test_single_byte_does_not_complete() {
        let inbox = SerialInbox::new();
        inbox.push_byte(b'>');
        assert!(!inbox.mark_idle_gap());
        assert_eq!(inbox.take_response(), None);
    }

    #[test]
    fn test_later_fill_accumulates_until_cleared() {
        let inbox = SerialInbox::new();
        inbox.push_bytes(b"SEND OK");
        inbox.mark_idle_gap();
        inbox.take_response();

        inbox.push_bytes(b" +IPD");
        inbox.mark_idle_gap();
        assert_eq!(inbox.take_response().as_deref(), Some(&b"SEND OK +IPD"[..]));

        inbox.clear();
        assert_eq!(inbox.buffered_len(), 0);
    }

    #[test]
    fn test_clear_drops_pending_completion() {
        let inbox = SerialInbox::new();
        inbox.push_bytes(b"stale");
        inbox.mark_idle_gap();
        inbox.clear();
        assert_eq!(inbox.take_response(), None);
    }

    #[test]
    fn test_overflow_counts_overruns() {
        let inbox = SerialInbox::new();
        inbox.push_bytes(&[b'x'; RECEIVE_BUFFER_CAPACITY + 3]);
        assert_eq!(inbox.buffered_len(), RECEIVE_BUFFER_CAPACITY);
        assert_eq!(inbox.line_errors().overrun, 3);
    }

    #[test]
    fn test_line_errors_by_category() {
        let inbox = SerialInbox::new();
        inbox.record_line_error(LineError::Noise);
        inbox.record_line_error(LineError::Noise);
        inbox.record_line_error(LineError::Framing);
        inbox.record_line_error(LineError::IdleLine);

        let counts = inbox.line_errors();
        assert_eq!(counts.noise, 2);
        assert_eq!(counts.framing, 1);
        assert_eq!(counts.idle_line, 1);
        assert_eq!(counts.overrun, 0);
    }
}
