use bitflags::bitflags;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::serial_inbox::SerialInbox;

// Receive side shared by the UART reader task and the pipeline loop
pub static SERIAL_INBOX: SerialInbox = SerialInbox::new();

// Raised by the UART reader when an idle gap completes a response, so the
// pipeline loop does not wait for its next tick
pub static RESPONSE_READY_SIGNAL: Signal<CriticalSectionRawMutex, ()> = Signal::new();

bitflags! {
    /// Pipeline status shared with the indicators and the request builder
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct StatusFlags: u8 {
        /// Server answered the last probe or long-poll
        const SERVER_AVAILABLE = 0b0000_0001;
        /// Modem joined the access point
        const NETWORK_CONNECTED = 0b0000_0010;
        /// Server asked for the debug payload
        const DEBUG_REQUESTED = 0b0000_0100;
        /// Server commanded the relay on
        const RELAY_ON = 0b0000_1000;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_are_independent() {
        let mut flags = StatusFlags::empty();
        flags.insert(StatusFlags::NETWORK_CONNECTED | StatusFlags::RELAY_ON);
        assert!(flags.contains(StatusFlags::NETWORK_CONNECTED));
        assert!(!flags.contains(StatusFlags::SERVER_AVAILABLE));

        flags.remove(StatusFlags::NETWORK_CONNECTED);
        assert!(!flags.contains(StatusFlags::NETWORK_CONNECTED));
        assert!(flags.contains(StatusFlags::RELAY_ON));
    }

    #[test]
    fn test_set_follows_condition() {
        let mut flags = StatusFlags::default();
        flags.set(StatusFlags::DEBUG_REQUESTED, true);
        assert_eq!(flags, StatusFlags::DEBUG_REQUESTED);
        flags.set(StatusFlags::DEBUG_REQUESTED, false);
        assert!(flags.is_empty());
    }
}
