use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::config::NumberingMode;
use crate::error::AppError;
use crate::gpio::{GpioBackend, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockLine {
    pub direction: Direction,
    pub level: Level,
}

/// In-memory board. Lines are keyed by BCM number regardless of the numbering mode.
#[derive(Default)]
pub struct MockGpioBackend {
    mode: RwLock<Option<NumberingMode>>,
    lines: RwLock<FxHashMap<u32, MockLine>>,
}

impl MockGpioBackend {
    pub fn with_mode(mode: NumberingMode) -> Self {
        Self {
            mode: RwLock::new(Some(mode)),
            lines: RwLock::new(FxHashMap::default()),
        }
    }

    /// Snapshot of a line, addressed in the current numbering mode.
    pub fn line(&self, line: u32) -> Option<MockLine> {
        let bcm = NumberingMode::resolve(*self.mode.read(), line).ok()?;
        self.lines.read().get(&bcm).copied()
    }

    /// Simulates something outside the registry changing the line level.
    pub fn set_external_level(&self, line: u32, level: Level) -> Result<(), AppError> {
        let bcm = self.resolve(line)?;
        let mut lines = self.lines.write();
        let entry = lines.entry(bcm).or_insert(MockLine {
            direction: Direction::Input,
            level,
        });
        entry.level = level;
        Ok(())
    }

    fn resolve(&self, line: u32) -> Result<u32, AppError> {
        NumberingMode::resolve(*self.mode.read(), line)
    }
}

impl GpioBackend for MockGpioBackend {
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
        let bcm = self.resolve(line)?;
        let mut lines = self.lines.write();
        let entry = lines.entry(bcm).or_insert(MockLine {
            direction: Direction::Output,
            level: Level::Low,
        });
        entry.direction = Direction::Output;
        Ok(())
    }

    fn write_line(&self, line: u32, level: Level) -> Result<(), AppError> {
        let bcm = self.resolve(line)?;
        let mut lines = self.lines.write();
        let entry = lines
            .get_mut(&bcm)
            .filter(|l| l.direction == Direction::Output)
            .ok_or_else(|| {
                AppError::Gpio(format!("line {line} must be set up as an output first"))
            })?;
        entry.level = level;
        Ok(())
    }

    fn read_line(&self, line: u32) -> Result<Level, AppError> {
        let bcm = self.resolve(line)?;
        self.lines
            .read()
            .get(&bcm)
            .map(|l| l.level)
            .ok_or_else(|| AppError::Gpio(format!("line {line} must be set up first")))
    }
}
