//! CIL instruction stream codec (ECMA-335 III).

use crate::{
    file::{parser::Parser, writer::Writer},
    metadata::{
        method::{Immediate, Instruction, Operand},
        token::Token,
    },
    Result,
};

/// Encoding of an instruction's inline operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand
    None,
    /// `int8`
    Int8,
    /// `unsigned int8`
    UInt8,
    /// `int32`
    Int32,
    /// `int64`
    Int64,
    /// `float32`
    Float32,
    /// `float64`
    Float64,
    /// Metadata token
    Token,
    /// `int8` branch displacement
    ShortBranch,
    /// `int32` branch displacement
    Branch,
    /// Jump table
    Switch,
    /// `unsigned int8` argument number
    ShortArgument,
    /// `unsigned int16` argument number
    Argument,
    /// `unsigned int8` local number
    ShortLocal,
    /// `unsigned int16` local number
    Local,
}

/// Operand encoding of `opcode`, `None` for unassigned opcodes.
#[must_use]
pub fn operand_type(opcode: u16) -> Option<OperandType> {
    use OperandType as O;

    if opcode & 0xFF00 == 0xFE00 {
        return match opcode & 0xFF {
            0x00..=0x05 | 0x0F | 0x11 | 0x13 | 0x14 | 0x17 | 0x18 | 0x1A | 0x1D | 0x1E => {
                Some(O::None)
            }
            0x06 | 0x07 | 0x15 | 0x16 | 0x1C => Some(O::Token),
            0x09..=0x0B => Some(O::Argument),
            0x0C..=0x0E => Some(O::Local),
            0x12 | 0x19 => Some(O::UInt8),
            _ => None,
        };
    }
    if opcode > 0xFF {
        return None;
    }

    match opcode {
        0x00..=0x0D | 0x14..=0x1E | 0x25 | 0x26 | 0x2A => Some(O::None),
        0x0E..=0x10 => Some(O::ShortArgument),
        0x11..=0x13 => Some(O::ShortLocal),
        0x1F => Some(O::Int8),
        0x20 => Some(O::Int32),
        0x21 => Some(O::Int64),
        0x22 => Some(O::Float32),
        0x23 => Some(O::Float64),
        0x27..=0x29 => Some(O::Token),
        0x2B..=0x37 | 0xDE => Some(O::ShortBranch),
        0x38..=0x44 | 0xDD => Some(O::Branch),
        0x45 => Some(O::Switch),
        0x46..=0x6E | 0x76 | 0x7A | 0x82..=0x8B | 0x8E | 0x90..=0xA2 | 0xB3..=0xBA | 0xC3 => {
            Some(O::None)
        }
        0x6F..=0x75 | 0x79 | 0x7B..=0x81 | 0x8C | 0x8D | 0x8F | 0xA3..=0xA5 | 0xC2 | 0xC6
        | 0xD0 => Some(O::Token),
        0xD1..=0xDC | 0xDF | 0xE0 => Some(O::None),
        _ => None,
    }
}

fn operand_size(instruction: &Instruction, operand: OperandType) -> usize {
    match operand {
        OperandType::None => 0,
        OperandType::Int8 | OperandType::UInt8 | OperandType::ShortBranch => 1,
        OperandType::ShortArgument | OperandType::ShortLocal => 1,
        OperandType::Argument | OperandType::Local => 2,
        OperandType::Int32
        | OperandType::Float32
        | OperandType::Token
        | OperandType::Branch => 4,
        OperandType::Int64 | OperandType::Float64 => 8,
        OperandType::Switch => match &instruction.operand {
            Operand::Switch(targets) => 4 + 4 * targets.len(),
            _ => 4,
        },
    }
}

fn checked_operand_type(opcode: u16) -> Result<OperandType> {
    operand_type(opcode).ok_or_else(|| malformed_error!("Invalid opcode: {:04X}", opcode))
}

/// Encoded size of an instruction in bytes.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for unassigned opcodes.
pub fn instruction_size(instruction: &Instruction) -> Result<usize> {
    let operand = checked_operand_type(instruction.opcode)?;
    let opcode_size = if instruction.opcode > 0xFF { 2 } else { 1 };
    Ok(opcode_size + operand_size(instruction, operand))
}

/// Decode a code stream. Branch targets become instruction indices; the returned
/// offsets hold the start of every instruction plus the end of the stream.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for unassigned opcodes and branches into the
/// middle of an instruction, and [`crate::Error::OutOfBounds`] for truncated code.
pub fn decode_instructions(code: &[u8]) -> Result<(Vec<Instruction>, Vec<u32>)> {
    let mut parser = Parser::new(code);
    let mut instructions = Vec::new();
    let mut offsets = Vec::new();
    // Branch displacements are resolved once every instruction start is known
    let mut raw_targets: Vec<(usize, Vec<i64>)> = Vec::new();

    while parser.has_more_data() {
        #[allow(clippy::cast_possible_truncation)]
        offsets.push(parser.pos() as u32);

        let first = parser.read_le::<u8>()?;
        let opcode = if first == 0xFE {
            0xFE00 | u16::from(parser.read_le::<u8>()?)
        } else {
            u16::from(first)
        };

        let operand = match checked_operand_type(opcode)? {
            OperandType::None => Operand::None,
            OperandType::Int8 => Operand::Immediate(Immediate::Int8(parser.read_le::<i8>()?)),
            OperandType::UInt8 => Operand::Immediate(Immediate::UInt8(parser.read_le::<u8>()?)),
            OperandType::Int32 => Operand::Immediate(Immediate::Int32(parser.read_le::<i32>()?)),
            OperandType::Int64 => Operand::Immediate(Immediate::Int64(parser.read_le::<i64>()?)),
            OperandType::Float32 => {
                Operand::Immediate(Immediate::Float32(parser.read_le::<f32>()?))
            }
            OperandType::Float64 => {
                Operand::Immediate(Immediate::Float64(parser.read_le::<f64>()?))
            }
            OperandType::Token => Operand::Token(Token::new(parser.read_le::<u32>()?)),
            OperandType::ShortArgument => {
                Operand::Argument(u16::from(parser.read_le::<u8>()?))
            }
            OperandType::Argument => Operand::Argument(parser.read_le::<u16>()?),
            OperandType::ShortLocal => Operand::Local(u16::from(parser.read_le::<u8>()?)),
            OperandType::Local => Operand::Local(parser.read_le::<u16>()?),
            OperandType::ShortBranch => {
                let delta = i64::from(parser.read_le::<i8>()?);
                raw_targets.push((instructions.len(), vec![parser.pos() as i64 + delta]));
                Operand::Target(0)
            }
            OperandType::Branch => {
                let delta = i64::from(parser.read_le::<i32>()?);
                raw_targets.push((instructions.len(), vec![parser.pos() as i64 + delta]));
                Operand::Target(0)
            }
            OperandType::Switch => {
                let count = parser.read_le::<u32>()? as usize;
                if count > parser.remaining() / 4 {
                    return Err(out_of_bounds_error!());
                }
                let mut deltas = Vec::with_capacity(count);
                for _ in 0..count {
                    deltas.push(i64::from(parser.read_le::<i32>()?));
                }
                let next = parser.pos() as i64;
                raw_targets.push((
                    instructions.len(),
                    deltas.into_iter().map(|delta| next + delta).collect(),
                ));
                Operand::Switch(Vec::new())
            }
        };

        instructions.push(Instruction { opcode, operand });
    }
    #[allow(clippy::cast_possible_truncation)]
    offsets.push(code.len() as u32);

    for (index, targets) in raw_targets {
        let mut resolved = Vec::with_capacity(targets.len());
        for target in targets {
            resolved.push(offset_to_index(&offsets, target)?);
        }
        instructions[index].operand = match instructions[index].operand {
            Operand::Switch(_) => Operand::Switch(resolved),
            _ => Operand::Target(resolved[0]),
        };
    }

    Ok((instructions, offsets))
}

/// Index of the instruction starting at `offset`; the end of the stream maps to the
/// instruction count.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for offsets that are not an instruction start.
pub fn offset_to_index(offsets: &[u32], offset: i64) -> Result<u32> {
    let Ok(offset) = u32::try_from(offset) else {
        return Err(malformed_error!("Branch target {} lies before the body", offset));
    };
    match offsets.binary_search(&offset) {
        #[allow(clippy::cast_possible_truncation)]
        Ok(index) => Ok(index as u32),
        Err(_) => Err(malformed_error!(
            "Offset 0x{:X} is not an instruction boundary",
            offset
        )),
    }
}

/// Start offsets of every instruction plus the end of the stream.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for unassigned opcodes.
pub fn instruction_offsets(instructions: &[Instruction]) -> Result<Vec<u32>> {
    let mut offsets = Vec::with_capacity(instructions.len() + 1);
    let mut offset = 0u32;
    for instruction in instructions {
        offsets.push(offset);
        #[allow(clippy::cast_possible_truncation)]
        let size = instruction_size(instruction)? as u32;
        offset += size;
    }
    offsets.push(offset);
    Ok(offsets)
}

fn branch_delta(offsets: &[u32], target: u32, next: u32) -> Result<i64> {
    let Some(target_offset) = offsets.get(target as usize) else {
        return Err(malformed_error!("Branch target {} is past the end of the body", target));
    };
    Ok(i64::from(*target_offset) - i64::from(next))
}

/// Encode an instruction stream, turning instruction indices back into displacements.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] when an operand does not match its opcode, a
/// short form cannot hold its value, or a branch target is out of range.
pub fn encode_instructions(instructions: &[Instruction], writer: &mut Writer) -> Result<()> {
    let offsets = instruction_offsets(instructions)?;

    for (index, instruction) in instructions.iter().enumerate() {
        let opcode = instruction.opcode;
        if opcode > 0xFF {
            writer.write_le::<u8>(0xFE);
        }
        #[allow(clippy::cast_possible_truncation)]
        writer.write_le::<u8>(opcode as u8);

        let next = offsets[index + 1];
        match (checked_operand_type(opcode)?, &instruction.operand) {
            (OperandType::None, Operand::None) => {}
            (OperandType::Int8, Operand::Immediate(Immediate::Int8(value))) => {
                writer.write_le::<i8>(*value);
            }
            (OperandType::UInt8, Operand::Immediate(Immediate::UInt8(value))) => {
                writer.write_le::<u8>(*value);
            }
            (OperandType::Int32, Operand::Immediate(Immediate::Int32(value))) => {
                writer.write_le::<i32>(*value);
            }
            (OperandType::Int64, Operand::Immediate(Immediate::Int64(value))) => {
                writer.write_le::<i64>(*value);
            }
            (OperandType::Float32, Operand::Immediate(Immediate::Float32(value))) => {
                writer.write_le::<f32>(*value);
            }
            (OperandType::Float64, Operand::Immediate(Immediate::Float64(value))) => {
                writer.write_le::<f64>(*value);
            }
            (OperandType::Token, Operand::Token(token)) => writer.write_le::<u32>(token.value()),
            (OperandType::ShortArgument, Operand::Argument(value))
            | (OperandType::ShortLocal, Operand::Local(value)) => {
                let Ok(value) = u8::try_from(*value) else {
                    return Err(malformed_error!(
                        "Opcode {:04X} cannot encode index {}",
                        opcode,
                        value
                    ));
                };
                writer.write_le::<u8>(value);
            }
            (OperandType::Argument, Operand::Argument(value))
            | (OperandType::Local, Operand::Local(value)) => writer.write_le::<u16>(*value),
            (OperandType::ShortBranch, Operand::Target(target)) => {
                let delta = branch_delta(&offsets, *target, next)?;
                let Ok(delta) = i8::try_from(delta) else {
                    return Err(malformed_error!(
                        "Short branch at instruction {} cannot reach {}",
                        index,
                        target
                    ));
                };
                writer.write_le::<i8>(delta);
            }
            (OperandType::Branch, Operand::Target(target)) => {
                let delta = branch_delta(&offsets, *target, next)?;
                let Ok(delta) = i32::try_from(delta) else {
                    return Err(malformed_error!("Branch displacement {} overflows", delta));
                };
                writer.write_le::<i32>(delta);
            }
            (OperandType::Switch, Operand::Switch(targets)) => {
                #[allow(clippy::cast_possible_truncation)]
                writer.write_le::<u32>(targets.len() as u32);
                for target in targets {
                    let delta = branch_delta(&offsets, *target, next)?;
                    let Ok(delta) = i32::try_from(delta) else {
                        return Err(malformed_error!("Switch displacement {} overflows", delta));
                    };
                    writer.write_le::<i32>(delta);
                }
            }
            (operand_type, operand) => {
                return Err(malformed_error!(
                    "Opcode {:04X} expects a {:?} operand, got {:?}",
                    opcode,
                    operand_type,
                    operand
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::method::opcodes;

    #[test]
    fn operand_types() {
        assert_eq!(operand_type(opcodes::NOP), Some(OperandType::None));
        assert_eq!(operand_type(opcodes::LDC_I4_S), Some(OperandType::Int8));
        assert_eq!(operand_type(opcodes::LDSTR), Some(OperandType::Token));
        assert_eq!(operand_type(opcodes::LEAVE_S), Some(OperandType::ShortBranch));
        assert_eq!(operand_type(opcodes::LDLOC), Some(OperandType::Local));
        assert_eq!(operand_type(opcodes::UNALIGNED), Some(OperandType::UInt8));
        assert_eq!(operand_type(0x24), None);
        assert_eq!(operand_type(0xFE08), None);
        assert_eq!(operand_type(0x0100), None);
    }

    #[test]
    fn decode_branches_to_indices() {
        #[rustfmt::skip]
        let code = [
            0x16,             // ldc.i4.0
            0x2D, 0x03,       // brtrue.s +3
            0x14,             // ldnull
            0x2B, 0x00,       // br.s +0
            0x26,             // pop
            0x2A,             // ret
        ];

        let (instructions, offsets) = decode_instructions(&code).unwrap();
        assert_eq!(offsets, vec![0, 1, 3, 4, 6, 7, 8]);
        assert_eq!(instructions[1].operand, Operand::Target(4));
        assert_eq!(instructions[3].operand, Operand::Target(4));

        let mut writer = Writer::new();
        encode_instructions(&instructions, &mut writer).unwrap();
        assert_eq!(writer.data(), &code);
    }

    #[test]
    fn decode_switch_and_wide_operands() {
        #[rustfmt::skip]
        let code = [
            0x45, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
            0x2A,
            0xFE, 0x0C, 0x01, 0x01,
            0x72, 0x01, 0x00, 0x00, 0x70,
        ];

        let (instructions, _) = decode_instructions(&code).unwrap();
        assert_eq!(instructions[0].operand, Operand::Switch(vec![1, 2]));
        assert_eq!(instructions[2].opcode, opcodes::LDLOC);
        assert_eq!(instructions[2].operand, Operand::Local(0x0101));
        assert_eq!(instructions[3].token(), Some(Token::new(0x7000_0001)));

        let mut writer = Writer::new();
        encode_instructions(&instructions, &mut writer).unwrap();
        assert_eq!(writer.data(), &code);
    }

    #[test]
    fn rejects_invalid_streams() {
        assert!(decode_instructions(&[0x24]).is_err());
        assert!(decode_instructions(&[0x20, 0x01]).is_err());
        // br.s into the middle of ldc.i4
        assert!(decode_instructions(&[0x2B, 0x01, 0x20, 0x00, 0x00, 0x00, 0x00]).is_err());
    }

    #[test]
    fn encode_rejects_unreachable_short_branch() {
        let mut instructions = vec![Instruction {
            opcode: opcodes::BR_S,
            operand: Operand::Target(200),
        }];
        instructions.extend(std::iter::repeat(Instruction::simple(opcodes::NOP)).take(200));
        let mut writer = Writer::new();
        assert!(encode_instructions(&instructions, &mut writer).is_err());

        let mismatched = [Instruction::with_token(opcodes::LDC_I4, Token::new(1))];
        assert!(encode_instructions(&mismatched, &mut Writer::new()).is_err());
    }
}
