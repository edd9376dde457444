//! Whole-machine snapshots.
//!
//! An image captures the two things execution depends on: the installed ROM
//! and the machine state.  Restoring one yields a machine that continues
//! exactly where the original would have; the host sync callback is not part
//! of an image and must be re-installed.  The JSON helpers are a convenience
//! for hosts that persist images; the encoding is whatever serde produces
//! and carries no stability promise.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bytecode::Rom;
use crate::interpreter::{Cpu, Machine};

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image encoding failed: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("image decoding failed: {0}")]
    Decode(#[source] serde_json::Error),
}

/// A point-in-time copy of a machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineImage {
    state: Cpu,
    rom: Rom,
}

impl MachineImage {
    /// Snapshot a machine.  Valid at any step boundary.
    pub fn capture(machine: &Machine) -> MachineImage {
        MachineImage {
            state: machine.state().clone(),
            rom: machine.rom().clone(),
        }
    }

    /// Rebuild a machine from this image.
    pub fn restore(self) -> Machine {
        Machine::with_state(self.rom, self.state)
    }

    pub fn to_json(&self) -> Result<String, ImageError> {
        serde_json::to_string(self).map_err(ImageError::Encode)
    }

    pub fn from_json(text: &str) -> Result<MachineImage, ImageError> {
        serde_json::from_str(text).map_err(ImageError::Decode)
    }
}
