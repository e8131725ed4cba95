//! Method body headers and exception sections (ECMA-335 II.25.4).

use bitflags::bitflags;

use crate::{
    file::{
        io::{read_le, read_le_at},
        writer::Writer,
    },
    metadata::{
        method::{
            instructions::{
                decode_instructions, encode_instructions, instruction_offsets, offset_to_index,
            },
            ExceptionHandler, ExceptionHandlerKind, MethodBody,
        },
        token::Token,
    },
    Result,
};

bitflags! {
    #[derive(PartialEq)]
    struct MethodBodyFlags: u16 {
        const TINY_FORMAT = 0x2;
        const FAT_FORMAT = 0x3;
        const MORE_SECTS = 0x8;
        const INIT_LOCALS = 0x10;
    }
}

bitflags! {
    #[derive(PartialEq)]
    struct SectionFlags: u8 {
        const EHTABLE = 0x1;
        const OPT_ILTABLE = 0x2;
        const FAT_FORMAT = 0x40;
        const MORE_SECTS = 0x80;
    }
}

const CLAUSE_CATCH: u32 = 0x0;
const CLAUSE_FILTER: u32 = 0x1;
const CLAUSE_FINALLY: u32 = 0x2;
const CLAUSE_FAULT: u32 = 0x4;

/// The max stack a tiny header implies.
const TINY_MAX_STACK: u16 = 8;

/// A method body as stored in the image, with the locals still behind their
/// stand-alone signature.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBody {
    /// Body with empty `locals`
    pub body: MethodBody,
    /// `StandAloneSig` token of the local variable signature, null if there is none
    pub local_var_sig: Token,
    /// Encoded size, including exception sections
    pub size: usize,
}

struct RawClause {
    flags: u32,
    try_offset: u32,
    try_length: u32,
    handler_offset: u32,
    handler_length: u32,
    class_or_filter: u32,
}

impl MethodBody {
    /// Decode the body starting at `data[0]`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for truncated bodies and
    /// [`crate::Error::Malformed`] for invalid headers, instructions or clauses.
    pub fn decode(data: &[u8]) -> Result<DecodedBody> {
        if data.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let first_byte = read_le::<u8>(data)?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b11)) {
            MethodBodyFlags::TINY_FORMAT => {
                let size_code = (first_byte >> 2) as usize;
                if size_code + 1 > data.len() {
                    return Err(out_of_bounds_error!());
                }

                let (instructions, _) = decode_instructions(&data[1..=size_code])?;
                Ok(DecodedBody {
                    body: MethodBody {
                        max_stack: TINY_MAX_STACK,
                        init_locals: false,
                        locals: Vec::new(),
                        instructions,
                        exception_handlers: Vec::new(),
                    },
                    local_var_sig: Token::new(0),
                    size: size_code + 1,
                })
            }
            MethodBodyFlags::FAT_FORMAT => {
                if data.len() < 12 {
                    return Err(out_of_bounds_error!());
                }

                let first_duo = read_le::<u16>(data)?;
                let size_header = ((first_duo >> 12) * 4) as usize;
                if size_header < 12 {
                    return Err(malformed_error!("Fat header size {} is too small", size_header));
                }
                let max_stack = read_le::<u16>(&data[2..])?;
                let size_code = read_le::<u32>(&data[4..])? as usize;
                let local_var_sig = Token::new(read_le::<u32>(&data[8..])?);
                let Some(code_end) = size_header.checked_add(size_code) else {
                    return Err(out_of_bounds_error!());
                };
                if data.len() < code_end {
                    return Err(out_of_bounds_error!());
                }

                let flags = MethodBodyFlags::from_bits_truncate(first_duo & 0x0FFF);
                let (instructions, offsets) = decode_instructions(&data[size_header..code_end])?;

                let mut size = code_end;
                let mut raw_clauses = Vec::new();
                if flags.contains(MethodBodyFlags::MORE_SECTS) {
                    size = read_sections(data, code_end, &mut raw_clauses)?;
                }

                let mut exception_handlers = Vec::with_capacity(raw_clauses.len());
                for clause in raw_clauses {
                    exception_handlers.push(clause_to_handler(&clause, &offsets)?);
                }

                Ok(DecodedBody {
                    body: MethodBody {
                        max_stack,
                        init_locals: flags.contains(MethodBodyFlags::INIT_LOCALS),
                        locals: Vec::new(),
                        instructions,
                        exception_handlers,
                    },
                    local_var_sig,
                    size,
                })
            }
            _ => Err(malformed_error!(
                "MethodHeader is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }

    /// Encode this body with `local_var_sig` as its locals signature. The tiny header
    /// is used whenever it can represent the body.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] when the instruction stream or an exception
    /// clause cannot be encoded.
    pub fn encode(&self, local_var_sig: Token, writer: &mut Writer) -> Result<()> {
        let mut code = Writer::new();
        encode_instructions(&self.instructions, &mut code)?;
        let code = code.into_inner();

        if code.len() < 64
            && local_var_sig.is_null()
            && self.exception_handlers.is_empty()
            && !self.init_locals
            && self.max_stack == TINY_MAX_STACK
        {
            #[allow(clippy::cast_possible_truncation)]
            writer.write_le::<u8>(((code.len() as u8) << 2) | 0x2);
            writer.write_bytes(&code);
            return Ok(());
        }

        let mut flags = MethodBodyFlags::FAT_FORMAT;
        if !self.exception_handlers.is_empty() {
            flags |= MethodBodyFlags::MORE_SECTS;
        }
        if self.init_locals {
            flags |= MethodBodyFlags::INIT_LOCALS;
        }
        let Ok(code_size) = u32::try_from(code.len()) else {
            return Err(malformed_error!("Method body of {} bytes is too large", code.len()));
        };

        writer.write_le::<u16>(0x3000 | flags.bits());
        writer.write_le::<u16>(self.max_stack);
        writer.write_le::<u32>(code_size);
        writer.write_le::<u32>(local_var_sig.value());
        writer.write_bytes(&code);

        if !self.exception_handlers.is_empty() {
            let offsets = instruction_offsets(&self.instructions)?;
            let mut clauses = Vec::with_capacity(self.exception_handlers.len());
            for handler in &self.exception_handlers {
                clauses.push(handler_to_clause(handler, &offsets)?);
            }
            writer.align(4, 0);
            write_section(&clauses, writer)?;
        }

        Ok(())
    }
}

fn read_sections(data: &[u8], code_end: usize, clauses: &mut Vec<RawClause>) -> Result<usize> {
    let mut cursor = (code_end + 3) & !3;
    loop {
        if data.len() < cursor + 4 {
            return Err(out_of_bounds_error!());
        }
        let section_flags = SectionFlags::from_bits_truncate(read_le::<u8>(&data[cursor..])?);
        let is_fat = section_flags.contains(SectionFlags::FAT_FORMAT);
        let section_size = if is_fat {
            (read_le::<u32>(&data[cursor..])? >> 8) as usize
        } else {
            usize::from(read_le::<u8>(&data[cursor + 1..])?)
        };
        if section_size < 4 || data.len() < cursor + section_size {
            return Err(out_of_bounds_error!());
        }

        if section_flags.contains(SectionFlags::EHTABLE) {
            let mut clause_cursor = cursor + 4;
            if is_fat {
                for _ in 0..(section_size - 4) / 24 {
                    clauses.push(RawClause {
                        flags: read_le_at::<u32>(data, &mut clause_cursor)?,
                        try_offset: read_le_at::<u32>(data, &mut clause_cursor)?,
                        try_length: read_le_at::<u32>(data, &mut clause_cursor)?,
                        handler_offset: read_le_at::<u32>(data, &mut clause_cursor)?,
                        handler_length: read_le_at::<u32>(data, &mut clause_cursor)?,
                        class_or_filter: read_le_at::<u32>(data, &mut clause_cursor)?,
                    });
                }
            } else {
                for _ in 0..(section_size - 4) / 12 {
                    clauses.push(RawClause {
                        flags: u32::from(read_le_at::<u16>(data, &mut clause_cursor)?),
                        try_offset: u32::from(read_le_at::<u16>(data, &mut clause_cursor)?),
                        try_length: u32::from(read_le_at::<u8>(data, &mut clause_cursor)?),
                        handler_offset: u32::from(read_le_at::<u16>(data, &mut clause_cursor)?),
                        handler_length: u32::from(read_le_at::<u8>(data, &mut clause_cursor)?),
                        class_or_filter: read_le_at::<u32>(data, &mut clause_cursor)?,
                    });
                }
            }
        } else if !section_flags.contains(SectionFlags::OPT_ILTABLE) {
            return Err(malformed_error!(
                "Unknown method data section - {:02X}",
                section_flags.bits()
            ));
        }

        cursor += section_size;
        if !section_flags.contains(SectionFlags::MORE_SECTS) {
            return Ok(cursor);
        }
        cursor = (cursor + 3) & !3;
    }
}

fn clause_to_handler(clause: &RawClause, offsets: &[u32]) -> Result<ExceptionHandler> {
    let kind = match clause.flags {
        CLAUSE_CATCH => ExceptionHandlerKind::Catch(Token::new(clause.class_or_filter)),
        CLAUSE_FILTER => ExceptionHandlerKind::Filter(offset_to_index(
            offsets,
            i64::from(clause.class_or_filter),
        )?),
        CLAUSE_FINALLY => ExceptionHandlerKind::Finally,
        CLAUSE_FAULT => ExceptionHandlerKind::Fault,
        other => return Err(malformed_error!("Invalid exception clause flags - {}", other)),
    };

    let try_end = i64::from(clause.try_offset) + i64::from(clause.try_length);
    let handler_end = i64::from(clause.handler_offset) + i64::from(clause.handler_length);
    Ok(ExceptionHandler {
        kind,
        try_start: offset_to_index(offsets, i64::from(clause.try_offset))?,
        try_end: offset_to_index(offsets, try_end)?,
        handler_start: offset_to_index(offsets, i64::from(clause.handler_offset))?,
        handler_end: offset_to_index(offsets, handler_end)?,
    })
}

fn handler_to_clause(handler: &ExceptionHandler, offsets: &[u32]) -> Result<RawClause> {
    let offset = |index: u32| {
        offsets.get(index as usize).copied().ok_or_else(|| {
            malformed_error!("Exception clause index {} is past the end of the body", index)
        })
    };

    let try_offset = offset(handler.try_start)?;
    let try_end = offset(handler.try_end)?;
    let handler_offset = offset(handler.handler_start)?;
    let handler_end = offset(handler.handler_end)?;
    if try_end < try_offset || handler_end < handler_offset {
        return Err(malformed_error!("Exception clause ends before it starts"));
    }

    let (flags, class_or_filter) = match handler.kind {
        ExceptionHandlerKind::Catch(token) => (CLAUSE_CATCH, token.value()),
        ExceptionHandlerKind::Filter(start) => (CLAUSE_FILTER, offset(start)?),
        ExceptionHandlerKind::Finally => (CLAUSE_FINALLY, 0),
        ExceptionHandlerKind::Fault => (CLAUSE_FAULT, 0),
    };

    Ok(RawClause {
        flags,
        try_offset,
        try_length: try_end - try_offset,
        handler_offset,
        handler_length: handler_end - handler_offset,
        class_or_filter,
    })
}

fn write_section(clauses: &[RawClause], writer: &mut Writer) -> Result<()> {
    let small = clauses.len() * 12 + 4 <= 0xFF
        && clauses.iter().all(|clause| {
            clause.try_offset <= 0xFFFF
                && clause.try_length <= 0xFF
                && clause.handler_offset <= 0xFFFF
                && clause.handler_length <= 0xFF
        });

    #[allow(clippy::cast_possible_truncation)]
    if small {
        writer.write_le::<u8>(SectionFlags::EHTABLE.bits());
        writer.write_le::<u8>((clauses.len() * 12 + 4) as u8);
        writer.write_le::<u16>(0);
        for clause in clauses {
            writer.write_le::<u16>(clause.flags as u16);
            writer.write_le::<u16>(clause.try_offset as u16);
            writer.write_le::<u8>(clause.try_length as u8);
            writer.write_le::<u16>(clause.handler_offset as u16);
            writer.write_le::<u8>(clause.handler_length as u8);
            writer.write_le::<u32>(clause.class_or_filter);
        }
    } else {
        let size = clauses.len() * 24 + 4;
        if size > 0x00FF_FFFF {
            return Err(malformed_error!("Too many exception clauses: {}", clauses.len()));
        }
        let flags = (SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT).bits();
        writer.write_le::<u32>(u32::from(flags) | ((size as u32) << 8));
        for clause in clauses {
            writer.write_le::<u32>(clause.flags);
            writer.write_le::<u32>(clause.try_offset);
            writer.write_le::<u32>(clause.try_length);
            writer.write_le::<u32>(clause.handler_offset);
            writer.write_le::<u32>(clause.handler_length);
            writer.write_le::<u32>(clause.class_or_filter);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::method::{opcodes, Instruction, Operand};

    #[test]
    fn tiny() {
        // ldnull; ret
        let data = [0x0A, 0x14, 0x2A, 0xFF];

        let decoded = MethodBody::decode(&data).unwrap();
        assert_eq!(decoded.size, 3);
        assert!(decoded.local_var_sig.is_null());
        assert_eq!(decoded.body.max_stack, 8);
        assert_eq!(
            decoded.body.instructions,
            vec![
                Instruction::simple(opcodes::LDNULL),
                Instruction::simple(opcodes::RET)
            ]
        );

        let mut writer = Writer::new();
        decoded.body.encode(decoded.local_var_sig, &mut writer).unwrap();
        assert_eq!(writer.data(), &data[..3]);
    }

    #[test]
    fn fat_with_locals() {
        #[rustfmt::skip]
        let data = [
            0x13, 0x30, 0x01, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x11,
            0x14, 0x0A, 0x2A,
        ];

        let decoded = MethodBody::decode(&data).unwrap();
        assert_eq!(decoded.size, 15);
        assert_eq!(decoded.local_var_sig, Token::new(0x1100_0001));
        assert_eq!(decoded.body.max_stack, 1);
        assert!(decoded.body.init_locals);
        assert_eq!(decoded.body.instructions.len(), 3);

        let mut writer = Writer::new();
        decoded.body.encode(decoded.local_var_sig, &mut writer).unwrap();
        assert_eq!(writer.data(), &data);
    }

    #[test]
    fn small_exception_section() {
        #[rustfmt::skip]
        let data = [
            // fat header, MORE_SECTS, max stack 1, code size 8, no locals
            0x0B, 0x30, 0x01, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x14,             // 0: ldnull
            0x26,             // 1: pop
            0xDE, 0x03,       // 2: leave.s 5
            0x26,             // 3: pop
            0xDE, 0x00,       // 4: leave.s 5
            0x2A,             // 5: ret
            // small EH section with one catch clause
            0x01, 0x10, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x04, 0x04, 0x00, 0x03, 0x01, 0x00, 0x00, 0x01,
            0x00,
        ];

        let decoded = MethodBody::decode(&data).unwrap();
        assert_eq!(decoded.size, data.len() - 1);
        assert_eq!(decoded.body.instructions[2].operand, Operand::Target(5));
        assert_eq!(
            decoded.body.exception_handlers,
            vec![ExceptionHandler {
                kind: ExceptionHandlerKind::Catch(Token::new(0x0100_0001)),
                try_start: 0,
                try_end: 3,
                handler_start: 3,
                handler_end: 5,
            }]
        );

        let mut writer = Writer::new();
        decoded.body.encode(decoded.local_var_sig, &mut writer).unwrap();
        assert_eq!(writer.data(), &data[..data.len() - 1]);
    }

    #[test]
    fn wide_clauses_use_fat_section() {
        let mut instructions = vec![Instruction::simple(opcodes::NOP); 300];
        instructions.push(Instruction::simple(opcodes::ENDFINALLY));
        instructions.push(Instruction::simple(opcodes::RET));
        let body = MethodBody {
            max_stack: 8,
            instructions,
            exception_handlers: vec![ExceptionHandler {
                kind: ExceptionHandlerKind::Finally,
                try_start: 0,
                try_end: 300,
                handler_start: 300,
                handler_end: 301,
            }],
            ..Default::default()
        };

        let mut writer = Writer::new();
        body.encode(Token::new(0), &mut writer).unwrap();
        let data = writer.into_inner();
        let section = (12 + 302 + 3) & !3;
        assert_eq!(data[section], 0x41);
        assert_eq!(data.len(), section + 28);

        let decoded = MethodBody::decode(&data).unwrap();
        assert_eq!(decoded.body, body);
    }

    #[test]
    fn invalid() {
        assert!(MethodBody::decode(&[]).is_err());
        assert!(MethodBody::decode(&[0x00]).is_err());
        assert!(MethodBody::decode(&[0x0E, 0x2A]).is_err());
        // handler starts inside ldc.i4
        #[rustfmt::skip]
        let data = [
            0x0B, 0x30, 0x01, 0x00, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x20, 0x00, 0x00, 0x00, 0x00, 0x2A,
            0x00, 0x00,
            0x01, 0x10, 0x00, 0x00,
            0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        assert!(MethodBody::decode(&data).is_err());
    }
}
