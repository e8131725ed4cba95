//! PE container updates for saved modules.
//!
//! A saved module keeps every section of the file it was loaded from. The rewritten
//! method bodies, resources, metadata and CLR header go into one new `.meta` section
//! appended at the end of the image, and the CLR data directory is pointed at it.
//! Modules built in memory start from [`skeleton`], a header-only PE32 DLL.

use goblin::pe::{
    header::{Header, SIZEOF_COFF_HEADER, SIZEOF_PE_MAGIC},
    section_table::SectionTable,
};

use crate::{
    file::io::{read_le_at, write_le_at},
    Result,
};

/// Name of the section holding the rewritten metadata
pub const META_SECTION_NAME: [u8; 8] = *b".meta\0\0\0";

/// `IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ`
const META_SECTION_CHARACTERISTICS: u32 = 0x4000_0040;

const SECTION_HEADER_SIZE: usize = 40;
const DEBUG_DIRECTORY_ENTRY_SIZE: usize = 28;

const DIRECTORY_CERTIFICATE: usize = 4;
const DIRECTORY_DEBUG: usize = 6;
const DIRECTORY_CLR: usize = 14;

// Optional header field offsets shared by PE32 and PE32+
const OPT_SIZE_OF_INITIALIZED_DATA: usize = 8;
const OPT_SIZE_OF_IMAGE: usize = 56;
const OPT_SIZE_OF_HEADERS: usize = 60;
const OPT_CHECKSUM: usize = 64;

fn align_up(value: u32, alignment: u32) -> Result<u32> {
    if alignment == 0 || !alignment.is_power_of_two() {
        return Err(malformed_error!("Invalid alignment - {}", alignment));
    }
    value
        .checked_next_multiple_of(alignment)
        .ok_or_else(|| malformed_error!("Value 0x{:x} overflows when aligned", value))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    let mut offset = offset;
    read_le_at::<u32>(data, &mut offset)
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) -> Result<()> {
    let mut offset = offset;
    write_le_at::<u32>(data, &mut offset, value)
}

/// Offsets and alignments of the headers of a PE image.
#[derive(Debug, Clone)]
pub struct PeLayout {
    pe_offset: usize,
    optional_offset: usize,
    data_directories: usize,
    directory_count: usize,
    section_table: usize,
    section_alignment: u32,
    file_alignment: u32,
    size_of_headers: u32,
    sections: Vec<SectionTable>,
}

impl PeLayout {
    /// Parse the header layout of `data`.
    ///
    /// # Errors
    /// Returns [`crate::Error::GoblinErr`] if goblin rejects the headers and
    /// [`crate::Error::Malformed`] for images without an optional header or with invalid
    /// alignments.
    pub fn parse(data: &[u8]) -> Result<PeLayout> {
        let header = Header::parse(data)?;
        let Some(optional_header) = header.optional_header else {
            return Err(malformed_error!("File does not have an OptionalHeader"));
        };

        let pe_offset = header.dos_header.pe_pointer as usize;
        let optional_offset = pe_offset + SIZEOF_PE_MAGIC + SIZEOF_COFF_HEADER;
        let is_64 = optional_header.standard_fields.magic == 0x20B;
        let (data_directories, count_offset) = if is_64 {
            (optional_offset + 112, optional_offset + 108)
        } else {
            (optional_offset + 96, optional_offset + 92)
        };
        let directory_count = read_u32(data, count_offset)? as usize;

        let section_table =
            optional_offset + usize::from(header.coff_header.size_of_optional_header);
        let mut offset = section_table;
        let sections = header.coff_header.sections(data, &mut offset)?;

        let windows_fields = optional_header.windows_fields;
        align_up(0, windows_fields.section_alignment)?;
        align_up(0, windows_fields.file_alignment)?;

        Ok(PeLayout {
            pe_offset,
            optional_offset,
            data_directories,
            directory_count,
            section_table,
            section_alignment: windows_fields.section_alignment,
            file_alignment: windows_fields.file_alignment,
            size_of_headers: windows_fields.size_of_headers,
            sections,
        })
    }

    /// RVA the next appended section will be mapped at.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the section end overflows.
    pub fn next_section_rva(&self) -> Result<u32> {
        let mut end = self.size_of_headers;
        for section in &self.sections {
            let size = section.virtual_size.max(section.size_of_raw_data);
            let Some(section_end) = section.virtual_address.checked_add(size) else {
                return Err(malformed_error!("Section end overflows"));
            };
            end = end.max(section_end);
        }
        align_up(end, self.section_alignment)
    }

    fn directory_offset(&self, index: usize) -> Result<usize> {
        if index >= self.directory_count {
            return Err(malformed_error!(
                "Image has {} data directories, needs {}",
                self.directory_count,
                index + 1
            ));
        }
        Ok(self.data_directories + index * 8)
    }

    fn rva_to_offset(&self, rva: u32) -> Option<usize> {
        self.sections.iter().find_map(|section| {
            let start = section.virtual_address;
            let delta = rva.checked_sub(start)?;
            (delta < section.size_of_raw_data)
                .then(|| section.pointer_to_raw_data as usize + delta as usize)
        })
    }

    /// End of the last section's raw data. Anything after it is overlay.
    fn raw_end(&self) -> usize {
        self.sections
            .iter()
            .map(|section| section.pointer_to_raw_data as usize + section.size_of_raw_data as usize)
            .fold(self.size_of_headers as usize, usize::max)
    }

    /// Make room for one more section header by growing the headers by one file
    /// alignment unit and moving all raw data back.
    fn grow_headers(&mut self, data: &mut Vec<u8>) -> Result<()> {
        let growth = self.file_alignment;
        let Some(new_size) = self.size_of_headers.checked_add(growth) else {
            return Err(malformed_error!("Header size overflows"));
        };
        let first_section = self
            .sections
            .iter()
            .map(|section| section.virtual_address)
            .min()
            .unwrap_or(u32::MAX);
        if new_size > first_section {
            return Err(unsupported_error!(
                "No room for another section header before RVA 0x{:x}",
                first_section
            ));
        }

        let insert_at = self.size_of_headers as usize;
        if insert_at > data.len() {
            return Err(out_of_bounds_error!());
        }
        data.splice(insert_at..insert_at, std::iter::repeat(0).take(growth as usize));

        for (index, section) in self.sections.iter_mut().enumerate() {
            if section.pointer_to_raw_data != 0 {
                section.pointer_to_raw_data += growth;
                let header = self.section_table + index * SECTION_HEADER_SIZE;
                write_u32(data, header + 20, section.pointer_to_raw_data)?;
            }
        }

        let symbol_table = self.pe_offset + SIZEOF_PE_MAGIC + 8;
        let pointer = read_u32(data, symbol_table)?;
        if pointer != 0 {
            write_u32(data, symbol_table, pointer + growth)?;
        }

        if DIRECTORY_DEBUG < self.directory_count {
            let directory = self.directory_offset(DIRECTORY_DEBUG)?;
            let rva = read_u32(data, directory)?;
            let size = read_u32(data, directory + 4)? as usize;
            if rva != 0 {
                let Some(start) = self.rva_to_offset(rva) else {
                    return Err(malformed_error!("Debug directory RVA 0x{:x} is not mapped", rva));
                };
                for entry in 0..size / DEBUG_DIRECTORY_ENTRY_SIZE {
                    let field = start + entry * DEBUG_DIRECTORY_ENTRY_SIZE + 24;
                    let pointer = read_u32(data, field)?;
                    if pointer != 0 {
                        write_u32(data, field, pointer + growth)?;
                    }
                }
            }
        }

        self.size_of_headers = new_size;
        write_u32(data, self.optional_offset + OPT_SIZE_OF_HEADERS, new_size)
    }

    /// Append `content` as a new section and point the CLR data directory at
    /// `cor20_rva`. Certificates and other overlay data are dropped, since they no
    /// longer match the image.
    ///
    /// `content` must have been laid out for [`PeLayout::next_section_rva`].
    ///
    /// # Errors
    /// Returns [`crate::Error::Unsupported`] when the headers cannot grow and
    /// [`crate::Error::Malformed`] for inconsistent headers.
    pub fn append_section(
        mut self,
        mut data: Vec<u8>,
        content: &[u8],
        cor20_rva: u32,
        cor20_size: u32,
    ) -> Result<Vec<u8>> {
        let rva = self.next_section_rva()?;
        data.truncate(self.raw_end());

        let next_header = self.section_table + (self.sections.len() + 1) * SECTION_HEADER_SIZE;
        if next_header > self.size_of_headers as usize {
            self.grow_headers(&mut data)?;
        }

        let Ok(virtual_size) = u32::try_from(content.len()) else {
            return Err(malformed_error!("Section of {} bytes is too large", content.len()));
        };
        let raw_size = align_up(virtual_size, self.file_alignment)?;
        let Ok(file_end) = u32::try_from(data.len()) else {
            return Err(malformed_error!("Image of {} bytes is too large", data.len()));
        };
        let raw_pointer = align_up(file_end, self.file_alignment)?;

        data.resize(raw_pointer as usize, 0);
        data.extend_from_slice(content);
        data.resize(raw_pointer as usize + raw_size as usize, 0);

        let header = self.section_table + self.sections.len() * SECTION_HEADER_SIZE;
        data[header..header + 8].copy_from_slice(&META_SECTION_NAME);
        write_u32(&mut data, header + 8, virtual_size)?;
        write_u32(&mut data, header + 12, rva)?;
        write_u32(&mut data, header + 16, raw_size)?;
        write_u32(&mut data, header + 20, raw_pointer)?;
        data[header + 24..header + 36].fill(0);
        write_u32(&mut data, header + 36, META_SECTION_CHARACTERISTICS)?;

        let Ok(section_count) = u16::try_from(self.sections.len() + 1) else {
            return Err(malformed_error!("Too many sections"));
        };
        let mut offset = self.pe_offset + SIZEOF_PE_MAGIC + 2;
        write_le_at::<u16>(&mut data, &mut offset, section_count)?;

        let Some(section_end) = rva.checked_add(virtual_size) else {
            return Err(malformed_error!("Section end overflows"));
        };
        let size_of_image = align_up(section_end, self.section_alignment)?;
        write_u32(&mut data, self.optional_offset + OPT_SIZE_OF_IMAGE, size_of_image)?;
        let initialized = read_u32(&data, self.optional_offset + OPT_SIZE_OF_INITIALIZED_DATA)?;
        write_u32(
            &mut data,
            self.optional_offset + OPT_SIZE_OF_INITIALIZED_DATA,
            initialized.saturating_add(raw_size),
        )?;

        let clr = self.directory_offset(DIRECTORY_CLR)?;
        write_u32(&mut data, clr, cor20_rva)?;
        write_u32(&mut data, clr + 4, cor20_size)?;
        let certificates = self.directory_offset(DIRECTORY_CERTIFICATE)?;
        write_u32(&mut data, certificates, 0)?;
        write_u32(&mut data, certificates + 4, 0)?;

        let checksum_offset = self.optional_offset + OPT_CHECKSUM;
        write_u32(&mut data, checksum_offset, 0)?;
        let checksum = pe_checksum(&data, checksum_offset);
        write_u32(&mut data, checksum_offset, checksum)?;

        Ok(data)
    }
}

/// The PE image checksum: a 16-bit one's complement sum over the file, skipping the
/// checksum field, plus the file length.
#[must_use]
pub fn pe_checksum(data: &[u8], checksum_offset: usize) -> u32 {
    let mut checksum: u64 = 0;
    let mut offset = 0;
    while offset < data.len() {
        if offset == checksum_offset {
            offset += 4;
            continue;
        }

        let word = match data.get(offset + 1) {
            Some(high) => u64::from(u16::from_le_bytes([data[offset], *high])),
            None => u64::from(data[offset]),
        };
        checksum += word;
        if checksum > 0xFFFF {
            checksum = (checksum & 0xFFFF) + (checksum >> 16);
        }
        offset += 2;
    }

    checksum = (checksum & 0xFFFF) + (checksum >> 16);
    #[allow(clippy::cast_possible_truncation)]
    let checksum = (checksum as u32).wrapping_add(data.len() as u32);
    checksum
}

/// A header-only PE32 DLL: DOS header, COFF header and an optional header with 16
/// empty data directories, padded to one file alignment unit.
#[must_use]
pub fn skeleton() -> Vec<u8> {
    let mut data = vec![0u8; 0x200];
    data[0..2].copy_from_slice(b"MZ");
    data[0x3C..0x40].copy_from_slice(&0x80u32.to_le_bytes());
    data[0x80..0x84].copy_from_slice(b"PE\0\0");

    let fields: [(usize, u32, usize); 19] = [
        // COFF header: machine i386, no sections, optional header size, DLL flags
        (0x84, 0x14C, 2),
        (0x94, 0xE0, 2),
        (0x96, 0x2102, 2),
        // Optional header
        (0x98, 0x10B, 2),
        (0x9A, 8, 1),
        (0x98 + 28, 0x1000_0000, 4),
        (0x98 + 32, 0x2000, 4),
        (0x98 + 36, 0x200, 4),
        (0x98 + 40, 4, 2),
        (0x98 + 48, 4, 2),
        (0x98 + OPT_SIZE_OF_IMAGE, 0x2000, 4),
        (0x98 + OPT_SIZE_OF_HEADERS, 0x200, 4),
        (0x98 + 68, 3, 2),
        (0x98 + 70, 0x8540, 2),
        (0x98 + 72, 0x10_0000, 4),
        (0x98 + 76, 0x1000, 4),
        (0x98 + 80, 0x10_0000, 4),
        (0x98 + 84, 0x1000, 4),
        (0x98 + 92, 16, 4),
    ];
    for (offset, value, width) in fields {
        data[offset..offset + width].copy_from_slice(&value.to_le_bytes()[..width]);
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skeleton_layout() {
        let data = skeleton();
        let layout = PeLayout::parse(&data).unwrap();
        assert!(layout.sections.is_empty());
        assert_eq!(layout.section_table, 0x178);
        assert_eq!(layout.directory_count, 16);
        assert_eq!(layout.next_section_rva().unwrap(), 0x2000);
    }

    #[test]
    fn append_section_updates_headers() {
        let content = vec![0xAB; 0x30];
        let data = PeLayout::parse(&skeleton())
            .unwrap()
            .append_section(skeleton(), &content, 0x2010, 72)
            .unwrap();

        assert_eq!(data.len(), 0x400);
        assert_eq!(&data[0x200..0x230], &content[..]);

        let layout = PeLayout::parse(&data).unwrap();
        assert_eq!(layout.sections.len(), 1);
        let section = &layout.sections[0];
        assert_eq!(section.name, META_SECTION_NAME);
        assert_eq!(section.virtual_address, 0x2000);
        assert_eq!(section.virtual_size, 0x30);
        assert_eq!(section.pointer_to_raw_data, 0x200);
        assert_eq!(section.characteristics, META_SECTION_CHARACTERISTICS);

        let clr = layout.directory_offset(DIRECTORY_CLR).unwrap();
        assert_eq!(read_u32(&data, clr).unwrap(), 0x2010);
        assert_eq!(read_u32(&data, clr + 4).unwrap(), 72);
        assert_eq!(read_u32(&data, 0x98 + OPT_SIZE_OF_IMAGE).unwrap(), 0x4000);

        let checksum = read_u32(&data, 0x98 + OPT_CHECKSUM).unwrap();
        assert_eq!(checksum, pe_checksum(&data, 0x98 + OPT_CHECKSUM));
        assert_ne!(checksum, 0);
    }

    #[test]
    fn append_grows_full_headers() {
        // Fill the section table so the next header does not fit in 0x200 bytes
        let mut data = skeleton();
        let mut layout = PeLayout::parse(&data).unwrap();
        for index in 0..3u32 {
            let content = vec![index as u8 + 1; 0x10];
            let rva = layout.next_section_rva().unwrap();
            data = layout.append_section(data, &content, rva, 72).unwrap();
            layout = PeLayout::parse(&data).unwrap();
        }
        assert_eq!(layout.size_of_headers, 0x200);
        let first_raw = layout.sections[0].pointer_to_raw_data;

        let rva = layout.next_section_rva().unwrap();
        let data = layout.append_section(data, &[0xEE; 8], rva, 72).unwrap();
        let layout = PeLayout::parse(&data).unwrap();

        assert_eq!(layout.sections.len(), 4);
        assert_eq!(layout.size_of_headers, 0x400);
        assert_eq!(layout.sections[0].pointer_to_raw_data, first_raw + 0x200);
        let moved = layout.sections[0].pointer_to_raw_data as usize;
        assert_eq!(&data[moved..moved + 0x10], &[1; 0x10]);
    }

    #[test]
    fn checksum_skips_its_field() {
        let mut data = vec![0x01, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x02];
        let checksum = pe_checksum(&data, 2);
        data[2..6].fill(0);
        assert_eq!(pe_checksum(&data, 2), checksum);
        assert_eq!(checksum, 1 + 2 + 7);
    }

    #[test]
    fn rejects_truncated_headers() {
        assert!(PeLayout::parse(&skeleton()[..0x90]).is_err());
    }
}
