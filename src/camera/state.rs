//! Camera acquisition state as reported by the device.

use serde::{Deserialize, Serialize};

/// Operating state, in ascending priority.
///
/// The device reports a flag byte; when several flags are set the
/// highest-priority state is the one reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CameraState {
    Idle,
    FilterMoving,
    Flushing,
    WaitingTrigger,
    Downloading,
    Reading,
    Exposing,
    Error,
}

impl CameraState {
    /// Flag-carrying states, from lowest to highest priority. Bit `n` of the
    /// device flag byte maps to entry `n`.
    const BY_BIT: [CameraState; 7] = [
        CameraState::FilterMoving,
        CameraState::Flushing,
        CameraState::WaitingTrigger,
        CameraState::Downloading,
        CameraState::Reading,
        CameraState::Exposing,
        CameraState::Error,
    ];

    /// Reduce a device flag byte to the single reported state.
    pub fn from_flags(flags: u8) -> Self {
        Self::BY_BIT
            .iter()
            .enumerate()
            .rev()
            .find(|(bit, _)| flags & (1 << bit) != 0)
            .map(|(_, state)| *state)
            .unwrap_or(CameraState::Idle)
    }

    /// Whether an exposure cycle is still in progress.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            CameraState::FilterMoving
                | CameraState::Flushing
                | CameraState::WaitingTrigger
                | CameraState::Exposing
                | CameraState::Reading
                | CameraState::Downloading
        )
    }

    /// Whether the camera will accept a new exposure.
    pub fn is_ready(self) -> bool {
        self == CameraState::Idle
    }
}

impl std::fmt::Display for CameraState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CameraState::Idle => "idle",
            CameraState::FilterMoving => "filter moving",
            CameraState::Flushing => "flushing",
            CameraState::WaitingTrigger => "waiting for trigger",
            CameraState::Downloading => "downloading",
            CameraState::Reading => "reading",
            CameraState::Exposing => "exposing",
            CameraState::Error => "error",
        };
        f.write_str(name)
    }
}
