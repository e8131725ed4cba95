//! Input backends, the parsed PE container and the binary reader/writer used by every
//! codec in the crate.
//!
//! A [`File`] wraps either a memory-mapped file on disk or an owned buffer behind the
//! [`Backend`] trait and keeps the goblin view of its PE headers next to the bytes, so
//! the metadata loader can translate RVAs without caring where the bytes live.
//! [`parser::Parser`] and [`writer::Writer`] provide the cursor-based decoding and
//! encoding primitives.

pub mod io;
pub mod parser;
pub mod writer;

mod memory;
mod physical;

use std::path::Path;

use crate::{
    Error::{Empty, GoblinErr},
    Result,
};
use goblin::pe::{
    header::{CoffHeader, DosHeader},
    optional_header::OptionalHeader,
    section_table::SectionTable,
    PE,
};
use memory::Memory;
use ouroboros::self_referencing;
use physical::Physical;

/// Backend for a [`File`].
pub trait Backend: Send + Sync {
    /// Returns a bounds-checked slice of the data.
    ///
    /// # Errors
    /// Returns an error if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;
}

/// A .NET PE file loaded from disk or memory.
///
/// The parsed [`PE`] borrows from the backend it was parsed from; both live in this
/// struct.
#[self_referencing]
pub struct File {
    data: Box<dyn Backend>,
    #[borrows(data)]
    #[not_covariant]
    pe: PE<'this>,
}

impl File {
    /// Memory-map a file from disk.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped,
    /// [`crate::Error::Empty`] if it has no content, [`crate::Error::GoblinErr`] if it is
    /// not a PE file and [`crate::Error::Malformed`] if it has no CLR header.
    pub fn from_file(file: &Path) -> Result<File> {
        Self::load(Physical::new(file)?)
    }

    /// Wrap an owned buffer.
    ///
    /// # Errors
    /// See [`File::from_file`].
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        Self::load(Memory::new(data))
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        File::try_new(Box::new(data), |data| match PE::parse(data.data()) {
            Ok(pe) => match pe.header.optional_header {
                Some(optional_header) => {
                    if optional_header
                        .data_directories
                        .get_clr_runtime_header()
                        .is_none()
                    {
                        Err(malformed_error!(
                            "File does not have a CLR runtime header directory"
                        ))
                    } else {
                        Ok(pe)
                    }
                }
                None => Err(malformed_error!("File does not have an OptionalHeader")),
            },
            Err(error) => Err(GoblinErr(error)),
        })
    }

    /// Total size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// True if the file holds no data. Never the case for a successfully loaded file.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Preferred load address of the image.
    #[must_use]
    pub fn imagebase(&self) -> u64 {
        self.with_pe(|pe| pe.image_base)
    }

    /// True for a PE32+ image.
    #[must_use]
    pub fn is_64(&self) -> bool {
        self.with_pe(|pe| pe.is_64)
    }

    /// The DOS header, which locates the PE signature.
    #[must_use]
    pub fn header_dos(&self) -> &DosHeader {
        self.with_pe(|pe| &pe.header.dos_header)
    }

    /// The COFF file header.
    #[must_use]
    pub fn header_coff(&self) -> &CoffHeader {
        self.with_pe(|pe| &pe.header.coff_header)
    }

    /// The optional header, verified to exist when the file was loaded.
    #[must_use]
    pub fn header_optional(&self) -> Option<&OptionalHeader> {
        self.with_pe(|pe| pe.header.optional_header.as_ref())
    }

    /// RVA and size of the CLR runtime header.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the directory is missing.
    pub fn clr(&self) -> Result<(usize, usize)> {
        self.header_optional()
            .and_then(|optional_header| optional_header.data_directories.get_clr_runtime_header().copied())
            .map(|clr_dir| (clr_dir.virtual_address as usize, clr_dir.size as usize))
            .ok_or_else(|| malformed_error!("File does not have a CLR runtime header directory"))
    }

    /// Section headers, in file order.
    pub fn sections(&self) -> impl Iterator<Item = &SectionTable> {
        self.with_pe(|pe| pe.sections.iter())
    }

    /// Translate an RVA into a file offset.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no section contains the RVA.
    pub fn rva_to_offset(&self, rva: usize) -> Result<usize> {
        for section in self.sections() {
            let start = section.virtual_address as usize;
            let size = section.virtual_size.max(section.size_of_raw_data) as usize;
            if rva >= start && rva < start + size {
                let delta = rva - start;
                if delta >= section.size_of_raw_data as usize {
                    return Err(malformed_error!(
                        "RVA 0x{:08x} lies in the uninitialized tail of a section",
                        rva
                    ));
                }
                return Ok(section.pointer_to_raw_data as usize + delta);
            }
        }

        Err(malformed_error!("RVA 0x{:08x} is not mapped by any section", rva))
    }

    /// Complete content of the file.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.with_data(|data| data.data())
    }

    /// Bounds-checked slice of the file content.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the file.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.with_data(|data| data.data_slice(offset, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test::sample_consumer, Error};
    use std::io::Write;

    fn sample_image() -> Vec<u8> {
        let (module, _) = sample_consumer();
        module.to_bytes().unwrap()
    }

    #[test]
    fn load_from_mem() {
        let data = sample_image();
        let length = data.len();
        let file = File::from_mem(data).unwrap();

        assert_eq!(file.len(), length);
        assert_eq!(file.data_slice(0, 2).unwrap(), b"MZ");
        assert!(matches!(
            file.data_slice(length - 1, 2),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(file.header_dos().pe_pointer >= 0x40);
        assert_eq!(file.sections().count(), 1);

        let (clr_rva, clr_size) = file.clr().unwrap();
        assert_eq!(clr_size, 72);
        let offset = file.rva_to_offset(clr_rva).unwrap();
        assert_eq!(file.data_slice(offset, 4).unwrap(), &[72, 0, 0, 0]);
        assert!(file.rva_to_offset(0x7FFF_0000).is_err());
    }

    #[test]
    fn load_rejects_non_pe() {
        assert!(matches!(
            File::from_mem(vec![1, 2, 3, 4]),
            Err(Error::GoblinErr(_))
        ));
    }

    #[test]
    fn load_empty() {
        assert!(matches!(File::from_mem(Vec::new()), Err(Error::Empty)));
    }

    #[test]
    fn load_from_disk() {
        let mut temp = tempfile::NamedTempFile::new().unwrap();
        let data = sample_image();
        temp.write_all(&data).unwrap();
        temp.flush().unwrap();

        let file = File::from_file(temp.path()).unwrap();
        assert_eq!(file.data(), data.as_slice());
        assert!(!file.is_64());
    }

    #[test]
    fn load_missing_file() {
        let result = File::from_file(Path::new("/definitely/not/here.dll"));
        assert!(matches!(result, Err(Error::FileError(_))));
    }
}
