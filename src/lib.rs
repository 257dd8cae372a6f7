pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod gpio;
pub mod registry;
pub mod routes;

pub use config::{AppConfig, GpioConfig, HttpConfig, NumberingMode};
pub use error::AppError;
pub use events::{Broadcast, EventBroadcaster, STATE_UPDATE, StateEvent, StateUpdate};
pub use gpio::{GpioBackend, Level};
pub use registry::{NewPin, Pin, PinPatch, PinRegistry, PinState};
pub use routes::AppState;

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodBackend;
pub use backend::MockGpioBackend;
