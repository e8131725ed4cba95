//! The CLI header (ECMA-335 II.25.3.3), found through data directory 14 of a managed PE.

use crate::{file::parser::Parser, file::writer::Writer, Result};

/// `COMIMAGE_FLAGS_STRONGNAMESIGNED`
pub const FLAG_STRONG_NAME_SIGNED: u32 = 0x0000_0008;

/// Size of the header in bytes.
pub const COR20_HEADER_SIZE: u32 = 72;

/// The CLI header of a managed image.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cor20Header {
    /// Header size, always 72
    pub cb: u32,
    /// Minimum runtime major version
    pub major_runtime_version: u16,
    /// Minimum runtime minor version
    pub minor_runtime_version: u16,
    /// RVA of the metadata root
    pub meta_data_rva: u32,
    /// Size of the metadata
    pub meta_data_size: u32,
    /// `COMIMAGE_FLAGS_*`
    pub flags: u32,
    /// `MethodDef` or `File` token of the entry point, 0 for libraries
    pub entry_point_token: u32,
    /// RVA of the embedded manifest resources
    pub resource_rva: u32,
    /// Size of the embedded manifest resources
    pub resource_size: u32,
    /// RVA of the strong-name signature
    pub strong_name_signature_rva: u32,
    /// Size of the strong-name signature
    pub strong_name_signature_size: u32,
    /// Reserved, always 0
    pub code_manager_table_rva: u32,
    /// Reserved, always 0
    pub code_manager_table_size: u32,
    /// RVA of the VTable fixups of mixed-mode images
    pub vtable_fixups_rva: u32,
    /// Size of the VTable fixups
    pub vtable_fixups_size: u32,
    /// Reserved, always 0
    pub export_address_table_jmp_rva: u32,
    /// Reserved, always 0
    pub export_address_table_jmp_size: u32,
    /// RVA of the native header of precompiled images
    pub managed_native_header_rva: u32,
    /// Size of the native header
    pub managed_native_header_size: u32,
}

impl Cor20Header {
    /// Decode the header.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for fewer than 72 bytes and
    /// [`crate::Error::Malformed`] for a wrong size field or a missing metadata root.
    pub fn read(data: &[u8]) -> Result<Cor20Header> {
        if data.len() < COR20_HEADER_SIZE as usize {
            return Err(out_of_bounds_error!());
        }

        let mut parser = Parser::new(data);
        let cb = parser.read_le::<u32>()?;
        if cb != COR20_HEADER_SIZE {
            return Err(malformed_error!(
                "Invalid CLR header size: expected 72, got {}",
                cb
            ));
        }

        let header = Cor20Header {
            cb,
            major_runtime_version: parser.read_le::<u16>()?,
            minor_runtime_version: parser.read_le::<u16>()?,
            meta_data_rva: parser.read_le::<u32>()?,
            meta_data_size: parser.read_le::<u32>()?,
            flags: parser.read_le::<u32>()?,
            entry_point_token: parser.read_le::<u32>()?,
            resource_rva: parser.read_le::<u32>()?,
            resource_size: parser.read_le::<u32>()?,
            strong_name_signature_rva: parser.read_le::<u32>()?,
            strong_name_signature_size: parser.read_le::<u32>()?,
            code_manager_table_rva: parser.read_le::<u32>()?,
            code_manager_table_size: parser.read_le::<u32>()?,
            vtable_fixups_rva: parser.read_le::<u32>()?,
            vtable_fixups_size: parser.read_le::<u32>()?,
            export_address_table_jmp_rva: parser.read_le::<u32>()?,
            export_address_table_jmp_size: parser.read_le::<u32>()?,
            managed_native_header_rva: parser.read_le::<u32>()?,
            managed_native_header_size: parser.read_le::<u32>()?,
        };

        if header.meta_data_rva == 0 || header.meta_data_size == 0 {
            return Err(malformed_error!("Metadata RVA and size cannot be zero"));
        }
        if (header.resource_rva == 0) != (header.resource_size == 0) {
            return Err(malformed_error!("Resource values are invalid"));
        }

        Ok(header)
    }

    /// A header for a freshly built IL-only library.
    #[must_use]
    pub fn il_only() -> Self {
        Cor20Header {
            cb: COR20_HEADER_SIZE,
            major_runtime_version: 2,
            minor_runtime_version: 5,
            flags: 0x0000_0001,
            ..Default::default()
        }
    }

    /// Append the 72-byte encoding.
    pub fn write(&self, writer: &mut Writer) {
        writer.write_le::<u32>(COR20_HEADER_SIZE);
        writer.write_le::<u16>(self.major_runtime_version);
        writer.write_le::<u16>(self.minor_runtime_version);
        for value in [
            self.meta_data_rva,
            self.meta_data_size,
            self.flags,
            self.entry_point_token,
            self.resource_rva,
            self.resource_size,
            self.strong_name_signature_rva,
            self.strong_name_signature_size,
            self.code_manager_table_rva,
            self.code_manager_table_size,
            self.vtable_fixups_rva,
            self.vtable_fixups_size,
            self.export_address_table_jmp_rva,
            self.export_address_table_jmp_size,
            self.managed_native_header_rva,
            self.managed_native_header_size,
        ] {
            writer.write_le::<u32>(value);
        }
    }
}
