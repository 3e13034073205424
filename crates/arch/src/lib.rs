//! Instruction set tables for the SVM 16-bit machine.
//!
//! This crate is the single source of truth for opcode numbering and arity,
//! register naming, operand type descriptors and address modes. Both the
//! assembler and the runtime build on it.

/// Known opcodes, in wire order. The numeric value of each variant is the
/// opcode byte emitted by the assembler and consumed by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    Halt = 1,
    Mov = 2,
    Push = 3,
    Pop = 4,
    Rng = 5,
    Seed = 6,

    Add = 7,
    Sub = 8,
    Mul = 9,
    Div = 10,
    Mod = 11,
    Shl = 12,
    Shr = 13,
    And = 14,
    Or = 15,
    Xor = 16,
    Abs = 17,
    Pow = 18,

    Ceq = 19,
    Cne = 20,
    Cgt = 21,
    Cge = 22,
    Clt = 23,
    Cle = 24,

    Jmp = 25,
    Jez = 26,
    Jnz = 27,
    Call = 28,
    Clez = 29,
    Clnz = 30,
    Ret = 31,

    Hwa = 32,
    Int = 33,

    Wait = 34,
    Iret = 35,
}

impl Opcode {
    /// Looks up the opcode for an instruction name. Names are matched
    /// case-insensitively. Returns `None` for unknown names, which may be
    /// macro references or assembler directives.
    pub fn from_name(name: &str) -> Option<Opcode> {
        use Opcode::*;
        let op = match name.to_ascii_uppercase().as_str() {
            "NOP" => Nop,
            "HALT" => Halt,
            "MOV" => Mov,
            "PUSH" => Push,
            "POP" => Pop,
            "RNG" => Rng,
            "SEED" => Seed,

            "ADD" => Add,
            "SUB" => Sub,
            "MUL" => Mul,
            "DIV" => Div,
            "MOD" => Mod,
            "SHL" => Shl,
            "SHR" => Shr,
            "AND" => And,
            "OR" => Or,
            "XOR" => Xor,
            "ABS" => Abs,
            "POW" => Pow,

            "CEQ" => Ceq,
            "CNE" => Cne,
            "CGT" => Cgt,
            "CGE" => Cge,
            "CLT" => Clt,
            "CLE" => Cle,

            "JMP" => Jmp,
            "JEZ" => Jez,
            "JNZ" => Jnz,
            "CALL" => Call,
            "CLEZ" => Clez,
            "CLNZ" => Clnz,
            "RET" => Ret,

            "HWA" => Hwa,
            "INT" => Int,

            "WAIT" => Wait,
            "IRET" => Iret,
            _ => return None,
        };
        Some(op)
    }

    /// Looks up the opcode for a raw opcode byte.
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        use Opcode::*;
        let op = match byte {
            0 => Nop,
            1 => Halt,
            2 => Mov,
            3 => Push,
            4 => Pop,
            5 => Rng,
            6 => Seed,
            7 => Add,
            8 => Sub,
            9 => Mul,
            10 => Div,
            11 => Mod,
            12 => Shl,
            13 => Shr,
            14 => And,
            15 => Or,
            16 => Xor,
            17 => Abs,
            18 => Pow,
            19 => Ceq,
            20 => Cne,
            21 => Cgt,
            22 => Cge,
            23 => Clt,
            24 => Cle,
            25 => Jmp,
            26 => Jez,
            27 => Jnz,
            28 => Call,
            29 => Clez,
            30 => Clnz,
            31 => Ret,
            32 => Hwa,
            33 => Int,
            34 => Wait,
            35 => Iret,
            _ => return None,
        };
        Some(op)
    }

    /// Returns the canonical upper-case mnemonic.
    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "NOP",
            Halt => "HALT",
            Mov => "MOV",
            Push => "PUSH",
            Pop => "POP",
            Rng => "RNG",
            Seed => "SEED",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Mod => "MOD",
            Shl => "SHL",
            Shr => "SHR",
            And => "AND",
            Or => "OR",
            Xor => "XOR",
            Abs => "ABS",
            Pow => "POW",
            Ceq => "CEQ",
            Cne => "CNE",
            Cgt => "CGT",
            Cge => "CGE",
            Clt => "CLT",
            Cle => "CLE",
            Jmp => "JMP",
            Jez => "JEZ",
            Jnz => "JNZ",
            Call => "CALL",
            Clez => "CLEZ",
            Clnz => "CLNZ",
            Ret => "RET",
            Hwa => "HWA",
            Int => "INT",
            Wait => "WAIT",
            Iret => "IRET",
        }
    }

    /// Returns the number of operands the instruction takes.
    pub fn argc(self) -> usize {
        use Opcode::*;
        match self {
            Add | Sub | Mul | Div | Mod | Shl | Shr | And | Or | Xor | Pow | Rng | Hwa => 3,
            Mov | Ceq | Cne | Cgt | Cge | Clt | Cle | Abs => 2,
            Push | Pop | Seed | Jmp | Jez | Jnz | Call | Clez | Clnz | Int | Wait => 1,
            Nop | Halt | Ret | Iret => 0,
        }
    }
}

/// Instruction operand address modes, as stored in bits 6..8 of the operand
/// attribute byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressMode {
    /// Operand is the 16-bit literal itself: `x = 123`.
    ImmediateConstant = 0,
    /// Operand is read from memory at the 16-bit literal: `x = mem[123]`.
    IndirectConstant = 1,
    /// Operand is a register: `x = r0`.
    ImmediateRegister = 2,
    /// Operand is read from memory at the register's value: `x = mem[r0]`.
    IndirectRegister = 3,
}

impl AddressMode {
    pub fn from_bits(bits: u8) -> AddressMode {
        match bits & 3 {
            0 => AddressMode::ImmediateConstant,
            1 => AddressMode::IndirectConstant,
            2 => AddressMode::ImmediateRegister,
            _ => AddressMode::IndirectRegister,
        }
    }

    /// True for the register-backed modes, which encode to a single byte.
    pub fn is_register(self) -> bool {
        matches!(
            self,
            AddressMode::ImmediateRegister | AddressMode::IndirectRegister
        )
    }
}

/// Operand type descriptors, as stored in bits 4..6 of the operand attribute
/// byte. The default when source code carries no descriptor is `I16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeDesc {
    U8 = 0,
    U16 = 1,
    I8 = 2,
    I16 = 3,
}

impl TypeDesc {
    /// Looks up a type descriptor by source name, case-insensitively.
    pub fn from_name(name: &str) -> Option<TypeDesc> {
        let t = match name.to_ascii_uppercase().as_str() {
            "U8" => TypeDesc::U8,
            "U16" => TypeDesc::U16,
            "I8" => TypeDesc::I8,
            "I16" => TypeDesc::I16,
            _ => return None,
        };
        Some(t)
    }

    pub fn from_bits(bits: u8) -> TypeDesc {
        match bits & 3 {
            0 => TypeDesc::U8,
            1 => TypeDesc::U16,
            2 => TypeDesc::I8,
            _ => TypeDesc::I16,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeDesc::U8 => "U8",
            TypeDesc::U16 => "U16",
            TypeDesc::I8 => "I8",
            TypeDesc::I16 => "I16",
        }
    }

    /// Returns the inclusive value range used for overflow checks.
    pub fn limits(self) -> (i64, i64) {
        match self {
            TypeDesc::U8 => (0, 0xff),
            TypeDesc::U16 => (0, 0xffff),
            TypeDesc::I8 => (-0x7f, 0x7f),
            TypeDesc::I16 => (-0x7fff, 0x7fff),
        }
    }
}

impl Default for TypeDesc {
    fn default() -> Self {
        TypeDesc::I16
    }
}

/// Returns the index for the given register name, matched case-insensitively.
/// Returns `None` if the name is not a register.
pub fn register_index(name: &str) -> Option<u8> {
    let index = match name.to_ascii_lowercase().as_str() {
        "r0" => 0,
        "r1" => 1,
        "r2" => 2,
        "r3" => 3,
        "r4" => 4,
        "r5" => 5,
        "r6" => 6,
        "r7" => 7,
        "rsp" => 8,
        "rip" => 9,
        "ria" => 10,
        "rst" => 11,
        _ => return None,
    };
    Some(index)
}

/// Returns true if the given name is a known register.
pub fn is_register(name: &str) -> bool {
    register_index(name).is_some()
}

/// Returns the name associated with the given register index.
pub fn register_name(index: u8) -> Option<&'static str> {
    let name = match index {
        0 => "R0",
        1 => "R1",
        2 => "R2",
        3 => "R3",
        4 => "R4",
        5 => "R5",
        6 => "R6",
        7 => "R7",
        8 => "RSP",
        9 => "RIP",
        10 => "RIA",
        11 => "RST",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_bytes_round_trip() {
        for byte in 0..=35u8 {
            let op = Opcode::from_byte(byte).expect("opcode");
            assert_eq!(op as u8, byte);
            assert_eq!(Opcode::from_name(op.name()), Some(op));
        }
        assert_eq!(Opcode::from_byte(36), None);
    }

    #[test]
    fn opcode_names_are_case_insensitive() {
        assert_eq!(Opcode::from_name("mov"), Some(Opcode::Mov));
        assert_eq!(Opcode::from_name("Halt"), Some(Opcode::Halt));
        assert_eq!(Opcode::from_name("frobnicate"), None);
    }

    #[test]
    fn register_indices_match_window_order() {
        assert_eq!(register_index("r0"), Some(0));
        assert_eq!(register_index("R7"), Some(7));
        assert_eq!(register_index("rsp"), Some(8));
        assert_eq!(register_index("RST"), Some(11));
        assert_eq!(register_index("r8"), None);
        assert_eq!(register_name(9), Some("RIP"));
    }

    #[test]
    fn type_limits() {
        assert_eq!(TypeDesc::U8.limits(), (0, 255));
        assert_eq!(TypeDesc::I16.limits(), (-0x7fff, 0x7fff));
        assert_eq!(TypeDesc::from_name("i8"), Some(TypeDesc::I8));
        assert_eq!(TypeDesc::default(), TypeDesc::I16);
    }
}
