use thiserror::Error;

/// Runtime faults. Only these terminate execution; arithmetic conditions
/// like overflow and divide-by-zero are recorded in the status register
/// instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VmError {
    #[error("unknown opcode {opcode:#04x} at {address:#06x}")]
    UnknownOpcode { opcode: u8, address: u16 },

    #[error("invalid device index {index} at {address:#06x}")]
    InvalidDeviceIndex { index: i64, address: u16 },

    #[error("end of instruction stream at {address:#06x}")]
    EndOfStream { address: u16 },

    #[error("program is already loaded; shut down first")]
    AlreadyRunning,

    #[error("device {id}: {message}")]
    Device { id: String, message: String },
}
