/// Script opcodes understood by the governance layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    OpReturn,
    OpDup,
    OpHash160,
    OpEqual,
    OpEqualVerify,
    OpChecksig,
}

impl Opcode {
    pub fn to_u8(&self) -> u8 {
        match self {
            Opcode::OpReturn => 0x6a,
            Opcode::OpDup => 0x76,
            Opcode::OpHash160 => 0xa9,
            Opcode::OpEqual => 0x87,
            Opcode::OpEqualVerify => 0x88,
            Opcode::OpChecksig => 0xac,
        }
    }
}

/// Push of exactly 20 bytes.
pub const PUSH_20: u8 = 0x14;
/// Push of exactly 32 bytes.
pub const PUSH_32: u8 = 0x20;
