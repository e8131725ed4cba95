//! Metadata tokens.
//!
//! A token is a 32-bit handle: the high byte selects the table
//! ([`crate::metadata::tables::TableId`]) and the low 24 bits hold the 1-based row.

use std::fmt;

use crate::metadata::tables::TableId;

/// A metadata token referencing a row in a metadata table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u32);

impl Token {
    /// Create a token from its raw value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Create a token from a table and a 1-based row.
    #[must_use]
    pub fn from_parts(table: TableId, row: u32) -> Self {
        Token((u32::from(table as u8) << 24) | (row & 0x00FF_FFFF))
    }

    /// Create the token for the zero-based arena `index` of `table`.
    #[must_use]
    pub fn from_index(table: TableId, index: usize) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        Self::from_parts(table, index as u32 + 1)
    }

    /// Raw token value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Raw table byte.
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// The table this token points into, if it is a known table.
    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        TableId::from_repr(self.table())
    }

    /// 1-based row number.
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Zero-based index into the owning arena, `None` for row 0.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        match self.row() {
            0 => None,
            row => Some(row as usize - 1),
        }
    }

    /// True if this is the null token.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// True if the token points into `table`.
    #[must_use]
    pub fn is_table(&self, table: TableId) -> bool {
        self.table() == table as u8
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
