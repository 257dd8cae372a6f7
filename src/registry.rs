use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::events::{Broadcast, STATE_UPDATE, StateUpdate};
use crate::gpio::{GpioBackend, Level};

/// Requested or observed level of a pin. Anything other than `high`/`low` is kept
/// verbatim as [`PinState::Unrecognized`] and never reaches the line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PinState {
    High,
    Low,
    Unrecognized(String),
}

impl PinState {
    pub fn level(&self) -> Option<Level> {
        match self {
            PinState::High => Some(Level::High),
            PinState::Low => Some(Level::Low),
            PinState::Unrecognized(_) => None,
        }
    }
}

impl From<Level> for PinState {
    fn from(level: Level) -> Self {
        match level {
            Level::High => PinState::High,
            Level::Low => PinState::Low,
        }
    }
}

impl From<String> for PinState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "high" => PinState::High,
            "low" => PinState::Low,
            _ => PinState::Unrecognized(value),
        }
    }
}

impl From<PinState> for String {
    fn from(state: PinState) -> Self {
        state.to_string()
    }
}

impl fmt::Display for PinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinState::High => f.write_str("high"),
            PinState::Low => f.write_str("low"),
            PinState::Unrecognized(other) => f.write_str(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pin {
    pub id: u32,
    pub pin_num: u32,
    pub function: String,
    pub state: PinState,
}

/// Full pin body, every field required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPin {
    pub pin_num: u32,
    pub function: String,
    pub state: PinState,
}

/// Partial pin body; only present fields overwrite the stored record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PinPatch {
    pub pin_num: Option<u32>,
    pub function: Option<String>,
    pub state: Option<PinState>,
}

impl From<NewPin> for PinPatch {
    fn from(pin: NewPin) -> Self {
        Self {
            pin_num: Some(pin.pin_num),
            function: Some(pin.function),
            state: Some(pin.state),
        }
    }
}

impl Pin {
    fn merge(&mut self, patch: PinPatch) {
        if let Some(pin_num) = patch.pin_num {
            self.pin_num = pin_num;
        }
        if let Some(function) = patch.function {
            self.function = function;
        }
        if let Some(state) = patch.state {
            self.state = state;
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    counter: u32,
    pins: Vec<Pin>,
}

impl RegistryInner {
    fn position(&self, id: u32) -> Result<usize, AppError> {
        self.pins
            .iter()
            .position(|pin| pin.id == id)
            .ok_or(AppError::NotFoundPin(id))
    }
}

/// Authoritative in-memory set of pins.
///
/// Every mutation drives the line before the record is committed (write-through),
/// and [`PinRegistry::get_by_id`] refreshes the stored state from the line before
/// returning it (read-through). A driver failure leaves the stored records as they
/// were before the call; the hardware is not rolled back. All operations are
/// serialized by one registry-wide lock so the id counter and the collection stay
/// consistent.
pub struct PinRegistry<B: GpioBackend> {
    backend: Arc<B>,
    broadcaster: Arc<dyn Broadcast>,
    inner: Mutex<RegistryInner>,
}

impl<B: GpioBackend> PinRegistry<B> {
    pub fn new(backend: Arc<B>, broadcaster: Arc<dyn Broadcast>) -> Self {
        Self {
            backend,
            broadcaster,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Stored pins in insertion order. States are the last written values, not
    /// re-read from the lines.
    pub fn list_all(&self) -> Vec<Pin> {
        self.inner.lock().pins.clone()
    }

    pub fn get_by_id(&self, id: u32) -> Result<Pin, AppError> {
        let mut inner = self.inner.lock();
        let idx = inner.position(id)?;
        self.sync_from_line(&mut inner.pins[idx])?;

        Ok(inner.pins[idx].clone())
    }

    pub fn create(&self, new_pin: NewPin) -> Result<Pin, AppError> {
        let mut inner = self.inner.lock();
        let id = inner.counter.checked_add(1).ok_or(AppError::IdsExhausted)?;
        let pin = Pin {
            id,
            pin_num: new_pin.pin_num,
            function: new_pin.function,
            state: new_pin.state,
        };

        self.backend.setup_output(pin.pin_num)?;
        self.drive(&pin)?;

        inner.counter = pin.id;
        inner.pins.push(pin.clone());
        info!(
            "created pin {} ({}) on line {} as {}",
            pin.id, pin.function, pin.pin_num, pin.state
        );

        self.notify(pin.pin_num, pin.state.to_string());
        Ok(pin)
    }

    pub fn update(&self, id: u32, patch: PinPatch) -> Result<Pin, AppError> {
        let mut inner = self.inner.lock();
        let idx = inner.position(id)?;
        self.sync_from_line(&mut inner.pins[idx])?;

        let mut pin = inner.pins[idx].clone();
        pin.merge(patch);

        self.backend.setup_output(pin.pin_num)?;
        self.drive(&pin)?;

        inner.pins[idx] = pin.clone();
        info!(
            "updated pin {} ({}) on line {} to {}",
            pin.id, pin.function, pin.pin_num, pin.state
        );

        self.notify(pin.pin_num, pin.state.to_string());
        Ok(pin)
    }

    /// Removes the pin and leaves its line driven low.
    pub fn delete(&self, id: u32) -> Result<(), AppError> {
        let mut inner = self.inner.lock();
        let idx = inner.position(id)?;
        let pin_num = inner.pins[idx].pin_num;

        self.backend.write_line(pin_num, Level::Low)?;

        let pin = inner.pins.remove(idx);
        info!("deleted pin {} ({}), line {pin_num} forced low", pin.id, pin.function);

        self.notify(pin_num, "deleted".to_string());
        Ok(())
    }

    /// Creates each pin in order, stopping at the first failure.
    pub fn seed(&self, pins: &[NewPin]) -> Result<(), AppError> {
        for pin in pins {
            self.create(pin.clone())?;
        }
        Ok(())
    }

    fn sync_from_line(&self, pin: &mut Pin) -> Result<(), AppError> {
        let level = self.backend.read_line(pin.pin_num)?;
        debug!("pin {} read line {} as {level:?}", pin.id, pin.pin_num);
        pin.state = level.into();
        Ok(())
    }

    fn drive(&self, pin: &Pin) -> Result<(), AppError> {
        match pin.state.level() {
            Some(level) => self.backend.write_line(pin.pin_num, level),
            None => {
                // the line keeps whatever level setup left it at
                warn!(
                    "unrecognized state {:?} for pin {}: no hardware write issued",
                    pin.state.to_string(),
                    pin.id
                );
                Ok(())
            }
        }
    }

    fn notify(&self, pin_num: u32, state: String) {
        self.broadcaster
            .broadcast(STATE_UPDATE, StateUpdate { pin_num, state });
    }
}
