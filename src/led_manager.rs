use log::info;

use crate::modem::{Indicator, Indicators};
use crate::system_state::StatusFlags;

const INDICATORS: [Indicator; 3] = [Indicator::Network, Indicator::Server, Indicator::Relay];

/// Status outputs derived from the scheduler flags.
///
/// Network blinks on every coarse tick while searching and is solid once
/// joined; server and relay mirror their flags. Outputs are only written
/// when their level changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusLeds {
    blink_on: bool,
    applied: [Option<bool>; 3],
}

impl StatusLeds {
    pub const fn new() -> Self {
        Self {
            blink_on: false,
            applied: [None; 3],
        }
    }

    pub fn tick(&mut self) {
        self.blink_on = !self.blink_on;
    }

    pub fn apply(&mut self, flags: &StatusFlags, indicators: &mut dyn Indicators) {
        for (slot, indicator) in INDICATORS.into_iter().enumerate() {
            let level = self.level(flags, indicator);
            if self.applied[slot] == Some(level) {
                continue;
            }

            indicators.set(indicator, level);
            self.applied[slot] = Some(level);
            match indicator {
                Indicator::Network if flags.contains(StatusFlags::NETWORK_CONNECTED) => {
                    info!("🟢 Network LED solid - joined access point")
                }
                Indicator::Network => {}
                Indicator::Server => info!("🔵 Server LED {}", if level { "on" } else { "off" }),
                Indicator::Relay => info!("🔴 Relay {}", if level { "on" } else { "off" }),
            }
        }
    }

    fn level(&self, flags: &StatusFlags, indicator: Indicator) -> bool {
        match indicator {
            Indicator::Network => flags.contains(StatusFlags::NETWORK_CONNECTED) || self.blink_on,
            Indicator::Server => flags.contains(StatusFlags::SERVER_AVAILABLE),
            Indicator::Relay => flags.contains(StatusFlags::RELAY_ON),
        }
    }
}
