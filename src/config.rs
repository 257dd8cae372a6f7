use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::registry::{NewPin, PinState};

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub unix_socket: Option<String>,
    pub host: Option<String>,
    pub path: String,
    pub timeout: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            unix_socket: None,
            host: Some("0.0.0.0:5050".to_string()),
            path: String::new(),
            timeout: 30,
        }
    }
}

/// Line addressing scheme handed to the driver before any line is touched.
#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NumberingMode {
    #[default]
    Bcm,
    Board,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct GpioConfig {
    pub chip: String,
    pub numbering: NumberingMode,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            chip: "/dev/gpiochip0".to_string(),
            numbering: NumberingMode::Bcm,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub gpio: GpioConfig,
    pub pins: Vec<NewPin>,
    pub broadcast_capacity: usize,
    pub event_history_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            gpio: GpioConfig::default(),
            pins: default_relay_fleet(),
            broadcast_capacity: 64,
            event_history_capacity: 32,
        }
    }
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Invalid config json: {e}")))
    }
}

/// Eight relay channels on BCM lines 5, 6, 13, 16, 19, 20, 21 and 26, all driven high.
pub fn default_relay_fleet() -> Vec<NewPin> {
    [5, 6, 13, 16, 19, 20, 21, 26]
        .into_iter()
        .enumerate()
        .map(|(channel, pin_num)| NewPin {
            pin_num,
            function: format!("relay_{}", channel + 1),
            state: PinState::High,
        })
        .collect()
}
