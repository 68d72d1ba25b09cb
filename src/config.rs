// Device Configuration Module
// Access point credentials, server endpoint and static address used by the pipeline

use std::net::Ipv4Addr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

// Compile-time defaults, used when no stored configuration exists
pub const DEFAULT_ACCESS_POINT_NAME: &str = "relay-link";
pub const DEFAULT_ACCESS_POINT_PASSWORD: &str = "relaylink01";
pub const DEFAULT_SERVER_ADDRESS: &str = "192.168.1.10";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_STATIC_IP: &str = "192.168.1.50";

const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 64;
const MAX_ACCESS_POINT_NAME_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub access_point_name: String,
    pub access_point_password: String,
    pub server_address: String,
    pub server_port: u16,
    /// `None` leaves address assignment to the access point
    #[serde(default)]
    pub static_ip: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            access_point_name: DEFAULT_ACCESS_POINT_NAME.to_string(),
            access_point_password: DEFAULT_ACCESS_POINT_PASSWORD.to_string(),
            server_address: DEFAULT_SERVER_ADDRESS.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            static_ip: Some(DEFAULT_STATIC_IP.to_string()),
        }
    }
}

impl DeviceConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| anyhow!("Failed to parse device config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| anyhow!("Failed to serialize device config: {}", e))
    }

    /// Every field ends up inside a quoted AT command argument, so quotes and
    /// commas are rejected along with the usual range checks.
    pub fn validate(&self) -> Result<()> {
        if self.access_point_name.is_empty() {
            return Err(anyhow!("Access point name cannot be empty"));
        }
        if self.access_point_name.len() > MAX_ACCESS_POINT_NAME_LEN {
            return Err(anyhow!(
                "Access point name too long: {} > {}",
                self.access_point_name.len(),
                MAX_ACCESS_POINT_NAME_LEN
            ));
        }
        if self.access_point_name.contains(['"', ',']) {
            return Err(anyhow!("Access point name cannot contain quotes or commas"));
        }

        let password_len = self.access_point_password.len();
        if password_len != 0 && !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&password_len) {
            return Err(anyhow!(
                "Access point password must be empty or {}-{} characters, got {}",
                MIN_PASSWORD_LEN,
                MAX_PASSWORD_LEN,
                password_len
            ));
        }
        if self.access_point_password.contains('"') {
            return Err(anyhow!("Access point password cannot contain quotes"));
        }

        if self.server_address.is_empty() || self.server_address.contains(['"', ',']) {
            return Err(anyhow!("Invalid server address: {:?}", self.server_address));
        }
        if self.server_port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }

        if let Some(ip) = &self.static_ip {
            ip.parse::<Ipv4Addr>()
                .map_err(|e| anyhow!("Invalid static IP {:?}: {}", ip, e))?;
        }

        Ok(())
    }
}
