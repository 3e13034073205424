//! The SVM runtime: a decoded-instruction interpreter with typed operands,
//! a callstack, a status register, a device interrupt queue and a fixed
//! memory map.

pub mod clock;
pub mod cpu;
pub mod device;
pub mod error;
pub mod instruction;
pub mod memory;

pub use cpu::{Cpu, Status, TraceFn};
pub use device::{Device, DeviceId, DeviceMap, IntSender};
pub use error::VmError;
pub use instruction::{Instruction, Operand};
pub use memory::{
    MEMORY_SIZE, Memory, R0, R1, R2, R3, R4, R5, R6, R7, REG_WINDOW, RIA, RIP, RSP, RST, USER_MEM,
};
