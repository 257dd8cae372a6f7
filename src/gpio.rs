use serde::{Deserialize, Serialize};

use crate::config::NumberingMode;
use crate::error::AppError;

/// Highest BCM line exposed on the 40-pin header.
pub const BCM_MAX_LINE: u32 = 27;

// (physical header position, BCM line)
const BOARD_TO_BCM: [(u32, u32); 28] = [
    (3, 2),
    (5, 3),
    (7, 4),
    (8, 14),
    (10, 15),
    (11, 17),
    (12, 18),
    (13, 27),
    (15, 22),
    (16, 23),
    (18, 24),
    (19, 10),
    (21, 9),
    (22, 25),
    (23, 11),
    (24, 8),
    (26, 7),
    (27, 0),
    (28, 1),
    (29, 5),
    (31, 6),
    (32, 12),
    (33, 13),
    (35, 19),
    (36, 16),
    (37, 26),
    (38, 20),
    (40, 21),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    High,
}

impl NumberingMode {
    /// Translates a line number in this scheme into a BCM line, `None` for channels
    /// that are not GPIOs.
    pub fn to_bcm(self, line: u32) -> Option<u32> {
        match self {
            NumberingMode::Bcm => (line <= BCM_MAX_LINE).then_some(line),
            NumberingMode::Board => BOARD_TO_BCM
                .iter()
                .find(|(physical, _)| *physical == line)
                .map(|(_, bcm)| *bcm),
        }
    }

    pub fn resolve(mode: Option<Self>, line: u32) -> Result<u32, AppError> {
        let mode = mode.ok_or_else(|| {
            AppError::Gpio("numbering mode not set, call set_mode first".into())
        })?;
        mode.to_bcm(line)
            .ok_or_else(|| AppError::Gpio(format!("invalid channel {line} for {mode:?} numbering")))
    }
}

/// Single-board line driver. Lines are addressed purely by number under the
/// scheme selected with [`GpioBackend::set_mode`].
pub trait GpioBackend: Send + Sync {
    fn set_mode(&self, mode: NumberingMode) -> Result<(), AppError>;
    /// Configures the line as an output. A line that is already an output keeps
    /// the level it is driving; a fresh line starts low.
    fn setup_output(&self, line: u32) -> Result<(), AppError>;
    fn write_line(&self, line: u32, level: Level) -> Result<(), AppError>;
    fn read_line(&self, line: u32) -> Result<Level, AppError>;
}
