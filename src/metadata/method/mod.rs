//! Method bodies and CIL instructions.
//!
//! Instructions keep their opcode and a decoded operand. Metadata operands are plain
//! [`Token`]s so the remapper can redirect them without touching the instruction
//! stream. Branch targets and exception clauses refer to instruction indices rather than
//! byte offsets, so a body can be re-encoded after its operands change.
//!
//! [`MethodBody::decode`] and [`MethodBody::encode`] convert between the model and the
//! tiny/fat body format of ECMA-335 II.25.4.

mod body;
mod instructions;

pub use body::DecodedBody;
pub use instructions::{operand_type, OperandType};

use crate::metadata::{signatures::TypeSignature, token::Token};

/// Opcode values used by the crate. Two-byte opcodes are stored as `0xFEnn`.
#[allow(non_snake_case, dead_code, missing_docs)]
pub mod opcodes {
    pub const NOP: u16 = 0x00;
    pub const LDARG_0: u16 = 0x02;
    pub const LDARG_1: u16 = 0x03;
    pub const LDLOC_0: u16 = 0x06;
    pub const STLOC_0: u16 = 0x0A;
    pub const LDARG_S: u16 = 0x0E;
    pub const LDLOC_S: u16 = 0x11;
    pub const LDNULL: u16 = 0x14;
    pub const LDC_I4_0: u16 = 0x16;
    pub const LDC_I4_S: u16 = 0x1F;
    pub const LDC_I4: u16 = 0x20;
    pub const LDC_I8: u16 = 0x21;
    pub const LDC_R4: u16 = 0x22;
    pub const LDC_R8: u16 = 0x23;
    pub const POP: u16 = 0x26;
    pub const CALL: u16 = 0x28;
    pub const CALLI: u16 = 0x29;
    pub const RET: u16 = 0x2A;
    pub const BR_S: u16 = 0x2B;
    pub const BRTRUE_S: u16 = 0x2D;
    pub const BR: u16 = 0x38;
    pub const BRTRUE: u16 = 0x3A;
    pub const SWITCH: u16 = 0x45;
    pub const CALLVIRT: u16 = 0x6F;
    pub const LDSTR: u16 = 0x72;
    pub const NEWOBJ: u16 = 0x73;
    pub const CASTCLASS: u16 = 0x74;
    pub const ISINST: u16 = 0x75;
    pub const LDFLD: u16 = 0x7B;
    pub const STFLD: u16 = 0x7D;
    pub const LDSFLD: u16 = 0x7E;
    pub const STSFLD: u16 = 0x80;
    pub const BOX: u16 = 0x8C;
    pub const NEWARR: u16 = 0x8D;
    pub const UNBOX_ANY: u16 = 0xA5;
    pub const LDTOKEN: u16 = 0xD0;
    pub const ENDFINALLY: u16 = 0xDC;
    pub const LEAVE: u16 = 0xDD;
    pub const LEAVE_S: u16 = 0xDE;
    pub const CEQ: u16 = 0xFE01;
    pub const LDFTN: u16 = 0xFE06;
    pub const LDLOC: u16 = 0xFE0C;
    pub const STLOC: u16 = 0xFE0E;
    pub const ENDFILTER: u16 = 0xFE11;
    pub const UNALIGNED: u16 = 0xFE12;
    pub const INITOBJ: u16 = 0xFE15;
    pub const SIZEOF: u16 = 0xFE1C;
}

/// Immediate operand value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// 8-bit signed
    Int8(i8),
    /// 8-bit unsigned, the alignment of `unaligned.` and the check mask of `no.`
    UInt8(u8),
    /// 32-bit signed
    Int32(i32),
    /// 64-bit signed
    Int64(i64),
    /// 32-bit float
    Float32(f32),
    /// 64-bit float
    Float64(f64),
}

/// Decoded instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// Constant value
    Immediate(Immediate),
    /// Branch target, as an instruction index
    Target(u32),
    /// Metadata token: type, field, method, member reference, method spec, stand-alone
    /// signature (`calli`) or user string (`ldstr`)
    Token(Token),
    /// Local variable index
    Local(u16),
    /// Argument index
    Argument(u16),
    /// Jump table, as instruction indices
    Switch(Vec<u32>),
}

/// A single CIL instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Opcode value
    pub opcode: u16,
    /// Operand
    pub operand: Operand,
}

impl Instruction {
    /// Instruction without an operand.
    #[must_use]
    pub fn simple(opcode: u16) -> Self {
        Instruction {
            opcode,
            operand: Operand::None,
        }
    }

    /// Instruction with a metadata token operand.
    #[must_use]
    pub fn with_token(opcode: u16, token: Token) -> Self {
        Instruction {
            opcode,
            operand: Operand::Token(token),
        }
    }

    /// The token operand, if any.
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        match self.operand {
            Operand::Token(token) => Some(token),
            _ => None,
        }
    }
}

/// What an exception clause does when control leaves its protected block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionHandlerKind {
    /// Typed catch, with the `TypeDefOrRef` token of the caught type
    Catch(Token),
    /// Filtered catch, with the index of the filter's first instruction
    Filter(u32),
    /// `finally` block
    Finally,
    /// `fault` block
    Fault,
}

/// An exception clause. Ranges are half-open instruction index ranges; an end equal to
/// the instruction count means the end of the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Clause kind
    pub kind: ExceptionHandlerKind,
    /// First protected instruction
    pub try_start: u32,
    /// End of the protected block
    pub try_end: u32,
    /// First handler instruction
    pub handler_start: u32,
    /// End of the handler
    pub handler_end: u32,
}

/// Body of a method.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MethodBody {
    /// Maximum evaluation stack depth
    pub max_stack: u16,
    /// Zero-initialize locals
    pub init_locals: bool,
    /// Local variable types
    pub locals: Vec<TypeSignature>,
    /// Instruction stream
    pub instructions: Vec<Instruction>,
    /// Exception clauses, innermost first
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// Visit every token referenced by locals, instruction operands and catch clauses.
    pub fn for_each_token(&self, f: &mut dyn FnMut(Token)) {
        for local in &self.locals {
            local.for_each_token(f);
        }
        for instruction in &self.instructions {
            if let Some(token) = instruction.token() {
                f(token);
            }
        }
        for handler in &self.exception_handlers {
            if let ExceptionHandlerKind::Catch(token) = handler.kind {
                f(token);
            }
        }
    }

    /// Mutable counterpart of [`MethodBody::for_each_token`].
    pub fn for_each_token_mut(&mut self, f: &mut dyn FnMut(&mut Token)) {
        for local in &mut self.locals {
            local.for_each_token_mut(f);
        }
        for instruction in &mut self.instructions {
            if let Operand::Token(token) = &mut instruction.operand {
                f(token);
            }
        }
        for handler in &mut self.exception_handlers {
            if let ExceptionHandlerKind::Catch(token) = &mut handler.kind {
                f(token);
            }
        }
    }
}
