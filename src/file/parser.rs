//! Cursor-based binary reader.
//!
//! [`Parser`] keeps a position within a borrowed byte slice and offers bounds-checked
//! reads for the encodings found in module images, ECMA-335 signature blobs,
//! `.resources` containers and BAML record streams:
//!
//! - fixed-size little-endian primitives ([`Parser::read_le`])
//! - ECMA-335 compressed integers and `TypeDefOrRef` coded tokens
//! - .NET `BinaryReader` 7-bit encoded integers and length-prefixed strings
//!
//! # Examples
//!
//! ```rust
//! use refremap::Parser;
//!
//! let data = [0x03, b'a', b'b', b'c', 0x2A, 0x00];
//! let mut parser = Parser::new(&data);
//!
//! assert_eq!(parser.read_prefixed_string_utf8()?, "abc");
//! assert_eq!(parser.read_le::<u16>()?, 42);
//! # Ok::<(), refremap::Error>(())
//! ```

use widestring::U16Str;

use crate::{
    file::io::{read_le_at, CilIO},
    metadata::token::Token,
    Result,
};

/// A bounds-checked reader over a byte slice.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Total length of the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the underlying data is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True if unread bytes remain.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Move to an absolute position. Seeking to the very end is allowed.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` is past the end of the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Skip `step` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if advancing would exceed the data length.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        let end = self.calc_end_position(step)?;
        self.position = end;
        Ok(())
    }

    /// Current position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// The complete underlying data.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Returns the byte at the current position without consuming it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn peek_byte(&self) -> Result<u8> {
        if self.position >= self.data.len() {
            return Err(out_of_bounds_error!());
        }
        Ok(self.data[self.position])
    }

    /// Read a little-endian primitive.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read an ECMA-335 II.23.2 compressed unsigned integer.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated input and
    /// [`crate::Error::Malformed`] on an invalid lead byte.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first_byte = self.read_le::<u8>()?;

        // 1-byte encoding: 0xxxxxxx
        if (first_byte & 0x80) == 0 {
            return Ok(u32::from(first_byte));
        }

        // 2-byte encoding: 10xxxxxx xxxxxxxx
        if (first_byte & 0xC0) == 0x80 {
            let second_byte = self.read_le::<u8>()?;
            return Ok(((u32::from(first_byte) & 0x3F) << 8) | u32::from(second_byte));
        }

        // 4-byte encoding: 110xxxxx xxxxxxxx xxxxxxxx xxxxxxxx
        if (first_byte & 0xE0) == 0xC0 {
            let b1 = u32::from(self.read_le::<u8>()?);
            let b2 = u32::from(self.read_le::<u8>()?);
            let b3 = u32::from(self.read_le::<u8>()?);
            return Ok(((u32::from(first_byte) & 0x1F) << 24) | (b1 << 16) | (b2 << 8) | b3);
        }

        Err(malformed_error!("Invalid compressed uint - {}", first_byte))
    }

    /// Read an ECMA-335 II.23.2 compressed signed integer.
    ///
    /// The sign bit is rotated into the least significant bit of a 7, 14 or 29 bit
    /// two's complement value.
    ///
    /// # Errors
    /// Returns an error on truncated input or an invalid lead byte.
    pub fn read_compressed_int(&mut self) -> Result<i32> {
        let width_bits = match self.peek_byte()? {
            byte if byte & 0x80 == 0 => 6,
            byte if byte & 0xC0 == 0x80 => 13,
            _ => 28,
        };
        let unsigned = self.read_compressed_uint()?;

        #[allow(clippy::cast_possible_wrap)]
        let magnitude = (unsigned >> 1) as i32;
        if unsigned & 1 == 0 {
            Ok(magnitude)
        } else {
            Ok(magnitude - (1 << width_bits))
        }
    }

    /// Read a compressed `TypeDefOrRef` coded index and expand it to a full token.
    ///
    /// # Errors
    /// Returns an error on truncated input or an invalid table tag.
    pub fn read_compressed_token(&mut self) -> Result<Token> {
        let compressed_token = self.read_compressed_uint()?;

        let table: u32 = match compressed_token & 0x3 {
            0x0 => 0x0200_0000, // TypeDef
            0x1 => 0x0100_0000, // TypeRef
            0x2 => 0x1B00_0000, // TypeSpec
            _ => {
                return Err(malformed_error!(
                    "Invalid compressed token - {}",
                    compressed_token
                ))
            }
        };

        Ok(Token::new(table | (compressed_token >> 2)))
    }

    /// Read a .NET `BinaryReader` 7-bit encoded integer.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated input and
    /// [`crate::Error::Malformed`] if the value exceeds 32 bits.
    pub fn read_7bit_encoded_int(&mut self) -> Result<u32> {
        let mut value = 0u32;
        let mut shift = 0;

        loop {
            let byte = self.read_le::<u8>()?;

            value |= u32::from(byte & 0x7F) << shift;
            shift += 7;

            if (byte & 0x80) == 0 {
                break;
            }

            if shift >= 32 {
                return Err(malformed_error!(
                    "7-bit encoded integer overflow after {} bits",
                    shift
                ));
            }
        }

        Ok(value)
    }

    /// Read a 7-bit length prefixed UTF-8 string.
    ///
    /// # Errors
    /// Returns an error on truncated input or invalid UTF-8.
    pub fn read_prefixed_string_utf8(&mut self) -> Result<String> {
        let length = self.read_7bit_encoded_int()? as usize;
        let start = self.position;
        let bytes = self.read_bytes(length)?;

        String::from_utf8(bytes.to_vec()).map_err(|e| {
            malformed_error!(
                "Invalid UTF-8 string at offset {}-{}: {}",
                start,
                start + length,
                e.utf8_error()
            )
        })
    }

    /// Read a 7-bit length prefixed UTF-16 string; the prefix counts bytes.
    ///
    /// # Errors
    /// Returns an error on truncated input, an odd byte length or invalid UTF-16.
    pub fn read_prefixed_string_utf16(&mut self) -> Result<String> {
        let length = self.read_7bit_encoded_int()? as usize;
        if length % 2 != 0 {
            return Err(malformed_error!("Invalid UTF-16 length - {}", length));
        }

        let bytes = self.read_bytes(length)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        U16Str::from_slice(&units)
            .to_string()
            .map_err(|_| malformed_error!("Invalid UTF-16 string ending at {}", self.position))
    }

    /// Number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Position after reading `length` more bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if that position lies past the data.
    pub fn calc_end_position(&self, length: usize) -> Result<usize> {
        let end = self
            .position
            .checked_add(length)
            .ok_or(out_of_bounds_error!())?;

        if end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        Ok(end)
    }

    /// Borrow the next `length` bytes and advance past them.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `length` bytes remain.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self.calc_end_position(length)?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_read_compressed_uint() {
        let test_cases = vec![
            (vec![0x03], 3),
            (vec![0x7F], 0x7F),
            (vec![0x80, 0x80], 0x80),
            (vec![0xBF, 0xFF], 0x3FFF),
            (vec![0xC0, 0x00, 0x00, 0x00], 0x00),
            (vec![0xDF, 0xFF, 0xFF, 0xFF], 0x1FFF_FFFF),
        ];

        for (input, expected) in test_cases {
            let mut parser = Parser::new(&input);
            assert_eq!(parser.read_compressed_uint().unwrap(), expected);
        }

        let mut parser = Parser::new(&[]);
        assert!(matches!(
            parser.read_compressed_uint(),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_read_compressed_int() {
        let test_cases = vec![
            (vec![0x06], 3),
            (vec![0x7B], -3),
            (vec![0x80, 0x80], 64),
            (vec![0x01], -64),
            (vec![0xC0, 0x00, 0x40, 0x00], 8192),
            (vec![0x80, 0x01], -8192),
            (vec![0xDF, 0xFF, 0xFF, 0xFE], 0x0FFF_FFFF),
            (vec![0xC0, 0x00, 0x00, 0x01], -0x1000_0000),
        ];

        for (input, expected) in test_cases {
            let mut parser = Parser::new(&input);
            assert_eq!(parser.read_compressed_int().unwrap(), expected);
        }
    }

    #[test]
    fn test_read_compressed_token() {
        // TypeRef row 3: (3 << 2) | 1
        let mut parser = Parser::new(&[0x0D]);
        assert_eq!(parser.read_compressed_token().unwrap(), Token::new(0x0100_0003));

        // TypeSpec row 1: (1 << 2) | 2
        let mut parser = Parser::new(&[0x06]);
        assert_eq!(parser.read_compressed_token().unwrap(), Token::new(0x1B00_0001));

        let mut parser = Parser::new(&[0x07]);
        assert!(matches!(
            parser.read_compressed_token(),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn test_read_7bit_encoded_int() {
        let mut parser = Parser::new(&[0x7F]);
        assert_eq!(parser.read_7bit_encoded_int().unwrap(), 0x7F);

        let mut parser = Parser::new(&[0x80, 0x01]);
        assert_eq!(parser.read_7bit_encoded_int().unwrap(), 0x80);

        let mut parser = Parser::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
        assert_eq!(parser.read_7bit_encoded_int().unwrap(), u32::MAX);

        let mut parser = Parser::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert!(matches!(
            parser.read_7bit_encoded_int(),
            Err(Error::Malformed { .. })
        ));

        let mut parser = Parser::new(&[0x80]);
        assert!(matches!(
            parser.read_7bit_encoded_int(),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_prefixed_strings() {
        let data = [
            0x02, b'h', b'i', 0x06, b'a', 0x00, b'b', 0x00, 0x2D, 0x4E, 0x00,
        ];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_prefixed_string_utf8().unwrap(), "hi");
        assert_eq!(parser.read_prefixed_string_utf16().unwrap(), "ab中");
        assert_eq!(parser.read_prefixed_string_utf16().unwrap(), "");
        assert!(!parser.has_more_data());
    }

    #[test]
    fn test_utf16_odd_length() {
        let mut parser = Parser::new(&[0x03, b'a', 0x00, b'b']);
        assert!(matches!(
            parser.read_prefixed_string_utf16(),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn test_seek_and_bytes() {
        let data = [1, 2, 3, 4];
        let mut parser = Parser::new(&data);
        parser.seek(4).unwrap();
        assert_eq!(parser.remaining(), 0);
        assert!(parser.seek(5).is_err());

        parser.seek(1).unwrap();
        assert_eq!(parser.read_bytes(2).unwrap(), &[2, 3]);
        assert!(parser.read_bytes(2).is_err());
        assert_eq!(parser.pos(), 3);
    }
}
