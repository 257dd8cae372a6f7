use log::debug;
use std::path::PathBuf;

use libgpiod::{chip::Chip, line, request};
use parking_lot::{FairMutex, RwLock, RwLockUpgradableReadGuard};
use rustc_hash::FxHashMap;

use crate::config::NumberingMode;
use crate::error::AppError;
use crate::gpio::{GpioBackend, Level};

/// Character-device driver. Each configured line holds its own request on the chip
/// for the lifetime of the process.
pub struct LibgpiodBackend {
    chip: String,
    mode: RwLock<Option<NumberingMode>>,
    lines: RwLock<FxHashMap<u32, FairMutex<GpiodHandle>>>, // keyed by BCM offset
}

struct GpiodHandle {
    request: request::Request,
}

impl GpiodHandle {
    fn new(chip: &str, line_cfg: &line::Config) -> Result<Self, AppError> {
        let chip = Self::open_chip(chip)?;
        let request = Self::request_lines(&chip, line_cfg)?;
        Ok(Self { request })
    }

    fn open_chip(path: &str) -> Result<Chip, AppError> {
        let p = PathBuf::from(path);
        Chip::open(&p).map_err(|e| AppError::Gpio(format!("open chip {path}: {e}")))
    }

    fn request_lines(chip: &Chip, line_cfg: &line::Config) -> Result<request::Request, AppError> {
        let mut req_cfg =
            request::Config::new().map_err(|e| AppError::Gpio(format!("request config: {e}")))?;
        req_cfg
            .set_consumer(env!("CARGO_PKG_NAME"))
            .map_err(|e| AppError::Gpio(format!("request consumer: {e}")))?;
        chip.request_lines(Some(&req_cfg), line_cfg)
            .map_err(|e| AppError::Gpio(format!("request lines: {e}")))
    }
}

impl LibgpiodBackend {
    pub fn new(chip: impl Into<String>) -> Result<Self, AppError> {
        let chip = chip.into();
        // fail early on a missing or inaccessible chip
        GpiodHandle::open_chip(&chip)?;

        Ok(Self {
            chip,
            mode: RwLock::new(None),
            lines: RwLock::new(FxHashMap::default()),
        })
    }

    fn resolve(&self, line: u32) -> Result<u32, AppError> {
        NumberingMode::resolve(*self.mode.read(), line)
    }

    /// Push-pull output settings. `latched` carries the level an already requested line
    /// is driving, otherwise the kernel resets the output to inactive on reconfigure.
    fn make_output_config(
        offset: u32,
        latched: Option<line::Value>,
    ) -> Result<line::Config, AppError> {
        let mut ls =
            line::Settings::new().map_err(|e| AppError::Gpio(format!("libgpiod settings: {e}")))?;
        ls.set_direction(line::Direction::Output)
            .map_err(|e| AppError::Gpio(format!("set direction: {e}")))?;
        ls.set_drive(line::Drive::PushPull)
            .map_err(|e| AppError::Gpio(format!("set drive: {e}")))?;
        if let Some(value) = latched {
            ls.set_output_value(value)
                .map_err(|e| AppError::Gpio(format!("set output value: {e}")))?;
        }

        let mut cfg =
            line::Config::new().map_err(|e| AppError::Gpio(format!("line config: {e}")))?;
        cfg.add_line_settings(&[offset], ls)
            .map_err(|e| AppError::Gpio(format!("line config add settings: {e}")))?;
        Ok(cfg)
    }
}

impl GpioBackend for LibgpiodBackend {
    fn set_mode(&self, mode: NumberingMode) -> Result<(), AppError> {
        let mut current = self.mode.write();
        match *current {
            Some(existing) if existing != mode => Err(AppError::Gpio(format!(
                "numbering mode already set to {existing:?}"
            ))),
            _ => {
                *current = Some(mode);
                Ok(())
            }
        }
    }

    fn setup_output(&self, line: u32) -> Result<(), AppError> {
        let offset = self.resolve(line)?;
        let lines = self.lines.upgradable_read();

        match lines.get(&offset) {
            Some(handle) => {
                let mut hdl = handle.lock();
                let current = hdl
                    .request
                    .value(offset)
                    .map_err(|e| AppError::Gpio(format!("get value: {e}")))?;
                let line_cfg = Self::make_output_config(offset, Some(current))?;
                hdl.request
                    .reconfigure_lines(&line_cfg)
                    .map_err(|e| AppError::Gpio(format!("reconfigure lines: {e}")))?;
            }
            None => {
                let line_cfg = Self::make_output_config(offset, None)?;
                // upgradable read is exclusive, so no other thread can insert this offset meanwhile
                let handle = GpiodHandle::new(&self.chip, &line_cfg)?;
                let mut lines = RwLockUpgradableReadGuard::upgrade(lines);
                lines.insert(offset, FairMutex::new(handle));
                debug!("requested line {offset} on {} as output", self.chip);
            }
        }

        Ok(())
    }

    fn write_line(&self, line: u32, level: Level) -> Result<(), AppError> {
        let offset = self.resolve(line)?;
        let lines = self.lines.read();
        let handle = lines.get(&offset).ok_or_else(|| {
            AppError::Gpio(format!("line {line} must be set up as an output first"))
        })?;

        handle
            .lock()
            .request
            .set_value(
                offset,
                match level {
                    Level::Low => line::Value::InActive,
                    Level::High => line::Value::Active,
                },
            )
            .map_err(|e| AppError::Gpio(format!("set value: {e}")))?;
        Ok(())
    }

    fn read_line(&self, line: u32) -> Result<Level, AppError> {
        let offset = self.resolve(line)?;
        let lines = self.lines.read();
        let handle = lines
            .get(&offset)
            .ok_or_else(|| AppError::Gpio(format!("line {line} must be set up first")))?;

        let value = handle
            .lock()
            .request
            .value(offset)
            .map_err(|e| AppError::Gpio(format!("get value: {e}")))?;
        Ok(match value {
            line::Value::InActive => Level::Low,
            line::Value::Active => Level::High,
        })
    }
}
