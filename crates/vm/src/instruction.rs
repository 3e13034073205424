use svm_arch::{AddressMode, Opcode, TypeDesc};

use crate::error::VmError;
use crate::memory::{Memory, RIP, USER_MEM};

/// A decoded instruction operand.
///
/// `address` is the location the operand refers to, when it has one;
/// `value` is the typed value fetched for it. For an immediate constant the
/// two coincide.
#[derive(Debug, Clone, Copy)]
pub struct Operand {
    pub mode: AddressMode,
    pub type_desc: TypeDesc,
    pub address: i64,
    pub value: i64,
}

impl Default for Operand {
    fn default() -> Operand {
        Operand {
            mode: AddressMode::ImmediateConstant,
            type_desc: TypeDesc::default(),
            address: 0,
            value: 0,
        }
    }
}

impl Operand {
    /// Decodes the next operand attribute byte and its payload.
    ///
    /// The attribute byte holds the address mode in bits 6..8, the operand
    /// type in bits 4..6 and, for register modes, the register index in the
    /// low four bits.
    fn decode(memory: &mut Memory) -> Result<Operand, VmError> {
        let attr = memory.next8()? as u8;
        let mode = AddressMode::from_bits(attr >> 6);
        let type_desc = TypeDesc::from_bits(attr >> 4);

        let mut op = Operand {
            mode,
            type_desc,
            ..Operand::default()
        };

        match mode {
            AddressMode::ImmediateConstant => {
                let literal = memory.next16()?;
                op.value = extend(literal, type_desc);
                op.address = op.value;
            }
            AddressMode::IndirectConstant => {
                op.address = memory.next16()?;
                op.value = memory.get_typed(type_desc, op.address);
            }
            AddressMode::ImmediateRegister => {
                op.address = (USER_MEM + (attr as usize & 0xf) * 2) as i64;
                op.value = memory.get_typed(type_desc, op.address);
            }
            AddressMode::IndirectRegister => {
                let reg = (USER_MEM + (attr as usize & 0xf) * 2) as i64;
                op.address = memory.get_u16(reg);
                op.value = memory.get_typed(type_desc, op.address);
            }
        }

        Ok(op)
    }
}

/// Interprets a raw 16-bit literal according to the operand type.
fn extend(literal: i64, type_desc: TypeDesc) -> i64 {
    match type_desc {
        TypeDesc::U8 => literal & 0xff,
        TypeDesc::U16 => literal & 0xffff,
        TypeDesc::I8 => literal as u8 as i8 as i64,
        TypeDesc::I16 => literal as u16 as i16 as i64,
    }
}

/// A fully decoded instruction.
#[derive(Debug, Clone, Copy)]
pub struct Instruction {
    /// Address the instruction was decoded from.
    pub ip: i64,
    pub opcode: Opcode,
    /// Operands A, B and C; only the first `opcode.argc()` are meaningful.
    pub args: [Operand; 3],
}

impl Instruction {
    /// Decodes the instruction at the instruction pointer, advancing it
    /// past the decoded bytes.
    pub fn decode(memory: &mut Memory) -> Result<Instruction, VmError> {
        let ip = memory.get_u16(RIP as i64);

        let byte = memory.next8()? as u8;
        let opcode = Opcode::from_byte(byte).ok_or(VmError::UnknownOpcode {
            opcode: byte,
            address: ip as u16,
        })?;

        let mut args = [Operand::default(); 3];
        for arg in args.iter_mut().take(opcode.argc()) {
            *arg = Operand::decode(memory)?;
        }

        Ok(Instruction { ip, opcode, args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_with(code: &[u8]) -> Memory {
        let mut mem = Memory::new();
        mem.write(0, code);
        mem
    }

    #[test]
    fn decodes_immediate_constant_sign_extended() {
        // MOV r0, -2 with default i16 operand types.
        let mut mem = memory_with(&[2, 0xb0, 0x30, 0xff, 0xfe]);
        let instr = Instruction::decode(&mut mem).expect("decode");

        assert_eq!(instr.opcode, Opcode::Mov);
        assert_eq!(instr.args[0].mode, AddressMode::ImmediateRegister);
        assert_eq!(instr.args[0].address, crate::memory::R0 as i64);
        assert_eq!(instr.args[1].mode, AddressMode::ImmediateConstant);
        assert_eq!(instr.args[1].value, -2);
        assert_eq!(mem.get_u16(RIP as i64), 5);
    }

    #[test]
    fn decodes_u8_literal_truncated() {
        // WAIT u8 500: the literal truncates to 244.
        let mut mem = memory_with(&[34, 0x00, 0x01, 0xf4]);
        let instr = Instruction::decode(&mut mem).expect("decode");
        assert_eq!(instr.opcode, Opcode::Wait);
        assert_eq!(instr.args[0].type_desc, TypeDesc::U8);
        assert_eq!(instr.args[0].value, 244);
    }

    #[test]
    fn decodes_indirect_constant_through_memory() {
        let mut mem = memory_with(&[3, 0x70, 0x02, 0x00]);
        mem.set_i16(0x200, -7);
        let instr = Instruction::decode(&mut mem).expect("decode");
        assert_eq!(instr.args[0].mode, AddressMode::IndirectConstant);
        assert_eq!(instr.args[0].address, 0x200);
        assert_eq!(instr.args[0].value, -7);
    }

    #[test]
    fn decodes_indirect_register_through_register_value() {
        let mut mem = memory_with(&[3, 0xf1]);
        mem.set_u16(crate::memory::R1 as i64, 0x300);
        mem.set_i16(0x300, 42);
        let instr = Instruction::decode(&mut mem).expect("decode");
        assert_eq!(instr.args[0].mode, AddressMode::IndirectRegister);
        assert_eq!(instr.args[0].address, 0x300);
        assert_eq!(instr.args[0].value, 42);
    }

    #[test]
    fn rejects_unknown_opcodes() {
        let mut mem = memory_with(&[0xee]);
        let err = Instruction::decode(&mut mem).expect_err("unknown opcode");
        assert_eq!(
            err,
            VmError::UnknownOpcode {
                opcode: 0xee,
                address: 0
            }
        );
    }

    #[test]
    fn reports_end_of_stream_for_literal_at_memory_top() {
        // A 16-bit literal whose read starts on the last user byte cannot
        // complete.
        let mut mem = Memory::new();
        let start = (USER_MEM - 4) as i64;
        mem.write(start, &[2, 0xb0, 0x30]);
        mem.set_u16(RIP as i64, start);

        let err = Instruction::decode(&mut mem).expect_err("end of stream");
        assert_eq!(
            err,
            VmError::EndOfStream {
                address: (USER_MEM - 1) as u16
            }
        );
    }
}
