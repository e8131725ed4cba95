//! Growable binary writer, the output counterpart of [`crate::file::parser::Parser`].

use widestring::U16String;

use crate::{
    file::io::{write_le_at, CilIO},
    metadata::{tables::TableId, token::Token},
    Result,
};

/// An append-only byte buffer with support for back-patching.
#[derive(Debug, Default)]
pub struct Writer {
    data: Vec<u8>,
}

impl Writer {
    /// Create an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Writer { data: Vec::new() }
    }

    /// Current write position (equal to the number of bytes written).
    #[must_use]
    pub fn pos(&self) -> usize {
        self.data.len()
    }

    /// Bytes written so far.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the writer and return its buffer.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Append a little-endian primitive.
    pub fn write_le<T: CilIO>(&mut self, value: T) {
        self.data.extend_from_slice(value.to_le_bytes().as_ref());
    }

    /// Overwrite a previously written primitive at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the value does not fit before the end
    /// of the written data.
    pub fn patch_le_at<T: CilIO>(&mut self, offset: usize, value: T) -> Result<()> {
        let mut offset = offset;
        write_le_at(&mut self.data, &mut offset, value)
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Append `fill` bytes until the position is a multiple of `alignment`.
    pub fn align(&mut self, alignment: usize, fill: u8) {
        let padding = (alignment - (self.data.len() % alignment)) % alignment;
        self.data.resize(self.data.len() + padding, fill);
    }

    /// Append an ECMA-335 II.23.2 compressed unsigned integer.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for values above `0x1FFF_FFFF`.
    pub fn write_compressed_uint(&mut self, value: u32) -> Result<()> {
        if value < 0x80 {
            #[allow(clippy::cast_possible_truncation)]
            self.data.push(value as u8);
        } else if value < 0x4000 {
            #[allow(clippy::cast_possible_truncation)]
            self.data
                .extend_from_slice(&[0x80 | (value >> 8) as u8, (value & 0xFF) as u8]);
        } else if value <= 0x1FFF_FFFF {
            self.data
                .extend_from_slice(&(0xC000_0000 | value).to_be_bytes());
        } else {
            return Err(malformed_error!(
                "Value {:#x} too large for compressed encoding",
                value
            ));
        }
        Ok(())
    }

    /// Append an ECMA-335 II.23.2 compressed signed integer.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for values outside the 29-bit signed range.
    pub fn write_compressed_int(&mut self, value: i32) -> Result<()> {
        let sign = u32::from(value < 0);
        #[allow(clippy::cast_sign_loss)]
        let rotated = ((value as u32) << 1) | sign;

        if (-0x40..0x40).contains(&value) {
            self.write_compressed_uint(rotated & 0x7F)
        } else if (-0x2000..0x2000).contains(&value) {
            // Always the two byte form, even when the rotated value would fit in one
            let rotated = rotated & 0x3FFF;
            #[allow(clippy::cast_possible_truncation)]
            self.data
                .extend_from_slice(&[0x80 | (rotated >> 8) as u8, (rotated & 0xFF) as u8]);
            Ok(())
        } else if (-0x1000_0000..0x1000_0000).contains(&value) {
            self.data
                .extend_from_slice(&(0xC000_0000 | (rotated & 0x1FFF_FFFF)).to_be_bytes());
            Ok(())
        } else {
            Err(malformed_error!(
                "Value {} too large for compressed encoding",
                value
            ))
        }
    }

    /// Append a `TypeDefOrRef` coded index for `token`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `token` is not a TypeDef, TypeRef or TypeSpec.
    pub fn write_compressed_token(&mut self, token: Token) -> Result<()> {
        let tag = match token.table_id() {
            Some(TableId::TypeDef) => 0,
            Some(TableId::TypeRef) => 1,
            Some(TableId::TypeSpec) => 2,
            _ => {
                return Err(malformed_error!(
                    "Token {} cannot be encoded as TypeDefOrRef",
                    token
                ))
            }
        };
        self.write_compressed_uint((token.row() << 2) | tag)
    }

    /// Append a .NET `BinaryWriter` 7-bit encoded integer.
    pub fn write_7bit_encoded_int(&mut self, value: u32) {
        let mut value = value;
        while value >= 0x80 {
            #[allow(clippy::cast_possible_truncation)]
            self.data.push((value as u8) | 0x80);
            value >>= 7;
        }
        #[allow(clippy::cast_possible_truncation)]
        self.data.push(value as u8);
    }

    /// Append a 7-bit length prefixed UTF-8 string.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the string is longer than `u32::MAX` bytes.
    pub fn write_prefixed_string_utf8(&mut self, value: &str) -> Result<()> {
        let length = u32::try_from(value.len())
            .map_err(|_| malformed_error!("String too long - {}", value.len()))?;
        self.write_7bit_encoded_int(length);
        self.data.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// Append a 7-bit byte-length prefixed UTF-16 string.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the encoded string is longer than `u32::MAX` bytes.
    pub fn write_prefixed_string_utf16(&mut self, value: &str) -> Result<()> {
        let units = U16String::from_str(value);
        let length = u32::try_from(units.len() * 2)
            .map_err(|_| malformed_error!("String too long - {}", units.len()))?;
        self.write_7bit_encoded_int(length);
        for unit in units.as_slice() {
            self.write_le::<u16>(*unit);
        }
        Ok(())
    }
}

/// Number of bytes [`Writer::write_7bit_encoded_int`] emits for `value`.
#[must_use]
pub fn size_of_7bit_encoded_int(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::parser::Parser;

    #[test]
    fn compressed_uint_widths() {
        let mut writer = Writer::new();
        writer.write_compressed_uint(0x03).unwrap();
        writer.write_compressed_uint(0x3FFF).unwrap();
        writer.write_compressed_uint(0x4000).unwrap();
        assert_eq!(
            writer.data(),
            &[0x03, 0xBF, 0xFF, 0xC0, 0x00, 0x40, 0x00]
        );
        assert!(writer.write_compressed_uint(0x2000_0000).is_err());
    }

    #[test]
    fn compressed_int_matches_parser() {
        for value in [0, 3, -3, 63, -64, 64, -65, 8191, -8192, 8192, 0x0FFF_FFFF, -0x1000_0000] {
            let mut writer = Writer::new();
            writer.write_compressed_int(value).unwrap();
            let data = writer.into_inner();
            let mut parser = Parser::new(&data);
            assert_eq!(parser.read_compressed_int().unwrap(), value);
            assert!(!parser.has_more_data());
        }

        let mut writer = Writer::new();
        writer.write_compressed_int(-3).unwrap();
        assert_eq!(writer.data(), &[0x7B]);
        assert!(writer.write_compressed_int(0x1000_0000).is_err());
    }

    #[test]
    fn compressed_token() {
        let mut writer = Writer::new();
        writer.write_compressed_token(Token::new(0x0100_0003)).unwrap();
        writer.write_compressed_token(Token::new(0x1B00_0001)).unwrap();
        assert_eq!(writer.data(), &[0x0D, 0x06]);
        assert!(writer.write_compressed_token(Token::new(0x0600_0001)).is_err());
    }

    #[test]
    fn seven_bit_sizes_match_output() {
        for value in [0, 0x7F, 0x80, 0x3FFF, 0x4000, 0x1F_FFFF, 0x20_0000, u32::MAX] {
            let mut writer = Writer::new();
            writer.write_7bit_encoded_int(value);
            assert_eq!(writer.pos(), size_of_7bit_encoded_int(value));

            let data = writer.into_inner();
            let mut parser = Parser::new(&data);
            assert_eq!(parser.read_7bit_encoded_int().unwrap(), value);
        }
    }

    #[test]
    fn utf16_prefix_counts_bytes() {
        let mut writer = Writer::new();
        writer.write_prefixed_string_utf16("ab").unwrap();
        assert_eq!(writer.data(), &[0x04, b'a', 0x00, b'b', 0x00]);
    }

    #[test]
    fn patch_and_align() {
        let mut writer = Writer::new();
        writer.write_le::<u32>(0);
        writer.write_le::<u8>(0xAA);
        writer.align(4, 0);
        assert_eq!(writer.pos(), 8);

        writer.patch_le_at::<u32>(0, 0x0102_0304).unwrap();
        assert_eq!(&writer.data()[..4], &[0x04, 0x03, 0x02, 0x01]);
        assert!(writer.patch_le_at::<u32>(6, 1).is_err());
    }
}
