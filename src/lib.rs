// relay-link
// Drives a serial-attached ESP8266 modem over AT commands and keeps a long-poll
// session with the back-end server open

pub mod classifier;
pub mod config;
pub mod handlers;
pub mod led_manager;
pub mod modem;
pub mod recovery;
pub mod request_builder;
pub mod retry;
pub mod scheduler;
pub mod serial_inbox;
pub mod system_state;
pub mod task_queue;
pub mod template;

#[cfg(target_os = "espidf")]
pub mod firmware;

pub use config::DeviceConfig;
pub use scheduler::{Board, Scheduler, SubmitError};
pub use serial_inbox::SerialInbox;
pub use task_queue::Task;
