//! The metadata root (ECMA-335 II.24.2.1): signature, runtime version string and the
//! stream directory.

use crate::{
    file::{io::read_le_at, writer::Writer},
    metadata::streams::StreamHeader,
    Result,
};

/// `BSJB`
pub const CIL_HEADER_MAGIC: u32 = 0x424A_5342;

/// The decoded metadata root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Root {
    /// Major version, 1
    pub major_version: u16,
    /// Minor version, 1
    pub minor_version: u16,
    /// Runtime version the image was built against, e.g. `v4.0.30319`
    pub version: String,
    /// Reserved flags
    pub flags: u16,
    /// The stream directory
    pub stream_headers: Vec<StreamHeader>,
}

impl Root {
    /// Decode the root at the start of `data`. Stream bounds are checked against `data`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a wrong signature or an empty stream
    /// directory and [`crate::Error::OutOfBounds`] for streams outside the metadata.
    pub fn read(data: &[u8]) -> Result<Root> {
        let mut offset = 0;
        let signature = read_le_at::<u32>(data, &mut offset)?;
        if signature != CIL_HEADER_MAGIC {
            return Err(malformed_error!(
                "CIL_HEADER_MAGIC does not match - {}",
                signature
            ));
        }

        let major_version = read_le_at::<u16>(data, &mut offset)?;
        let minor_version = read_le_at::<u16>(data, &mut offset)?;
        offset += 4;
        let length = read_le_at::<u32>(data, &mut offset)? as usize;
        let Some(version_data) = data.get(offset..offset.saturating_add(length)) else {
            return Err(out_of_bounds_error!());
        };
        let version_len = version_data
            .iter()
            .position(|byte| *byte == 0)
            .unwrap_or(version_data.len());
        let version = String::from_utf8_lossy(&version_data[..version_len]).into_owned();
        offset += length;

        let flags = read_le_at::<u16>(data, &mut offset)?;
        let stream_count = read_le_at::<u16>(data, &mut offset)?;
        if stream_count == 0 {
            return Err(malformed_error!("No valid streams have been found"));
        }

        let mut stream_headers = Vec::with_capacity(usize::from(stream_count));
        for _ in 0..stream_count {
            let header = StreamHeader::read(data, &mut offset)?;
            match header.offset.checked_add(header.size) {
                Some(end) if end as usize <= data.len() => stream_headers.push(header),
                _ => return Err(out_of_bounds_error!()),
            }
        }

        Ok(Root {
            major_version,
            minor_version,
            version,
            flags,
            stream_headers,
        })
    }

    /// Find a stream's bytes by name.
    #[must_use]
    pub fn stream<'a>(&self, data: &'a [u8], name: &str) -> Option<&'a [u8]> {
        self.stream_headers
            .iter()
            .find(|header| header.name == name)
            .and_then(|header| {
                data.get(header.offset as usize..(header.offset + header.size) as usize)
            })
    }

    /// Encoded size of the root including the stream directory.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        20 + (self.version.len() + 1).next_multiple_of(4)
            + self
                .stream_headers
                .iter()
                .map(StreamHeader::encoded_len)
                .sum::<usize>()
    }

    /// Append the root and its stream directory.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write(&self, writer: &mut Writer) {
        let padded = (self.version.len() + 1).next_multiple_of(4);
        writer.write_le::<u32>(CIL_HEADER_MAGIC);
        writer.write_le::<u16>(self.major_version);
        writer.write_le::<u16>(self.minor_version);
        writer.write_le::<u32>(0);
        writer.write_le::<u32>(padded as u32);
        writer.write_bytes(self.version.as_bytes());
        for _ in self.version.len()..padded {
            writer.write_le::<u8>(0);
        }
        writer.write_le::<u16>(self.flags);
        writer.write_le::<u16>(self.stream_headers.len() as u16);
        for header in &self.stream_headers {
            header.write(writer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let header_bytes = [
            0x42, 0x53, 0x4A, 0x42,
            0x01, 0x00,
            0x01, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x0C, 0x00, 0x00, 0x00,
            b'v', b'4', b'.', b'0', b'.', b'3', b'0', b'3', b'1', b'9', 0x00, 0x00,
            0x00, 0x00,
            0x01, 0x00,
            0x2C, 0x00, 0x00, 0x00,
            0x04, 0x00, 0x00, 0x00,
            b'#', b'~', 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ];

        let root = Root::read(&header_bytes).unwrap();
        assert_eq!(root.version, "v4.0.30319");
        assert_eq!(root.stream_headers.len(), 1);
        assert_eq!(root.stream_headers[0].name, "#~");
        assert_eq!(root.stream(&header_bytes, "#~"), Some(&[0u8; 4][..]));
        assert_eq!(root.stream(&header_bytes, "#Blob"), None);
        assert_eq!(root.encoded_len(), 44);

        let mut writer = Writer::new();
        root.write(&mut writer);
        assert_eq!(writer.data(), &header_bytes[..44]);
    }

    #[test]
    fn invalid() {
        assert!(Root::read(&[0x42, 0x53, 0x4A, 0x43, 0, 0, 0, 0]).is_err());

        #[rustfmt::skip]
        let stream_outside = [
            0x42, 0x53, 0x4A, 0x42, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x04, 0x00, 0x00, 0x00, b'v', b'4', 0x00, 0x00,
            0x00, 0x00, 0x01, 0x00,
            0x00, 0x01, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, b'#', b'~', 0x00, 0x00,
        ];
        assert!(Root::read(&stream_outside).is_err());
    }
}
