//! The `#GUID` heap: 16-byte entries addressed by a 1-based index.

use crate::Result;

/// Read view of a `#GUID` heap.
pub struct Guid<'a> {
    data: &'a [u8],
}

impl<'a> Guid<'a> {
    /// Wrap heap data.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the size is not a multiple of 16.
    pub fn from(data: &'a [u8]) -> Result<Guid<'a>> {
        if data.len() % 16 != 0 {
            return Err(malformed_error!("#GUID heap size {} is not a multiple of 16", data.len()));
        }

        Ok(Guid { data })
    }

    /// The GUID at the 1-based `index`; index 0 is the all-zero GUID.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] past the last entry.
    pub fn get(&self, index: usize) -> Result<[u8; 16]> {
        if index == 0 {
            return Ok([0; 16]);
        }

        let start = (index - 1) * 16;
        let Some(bytes) = self.data.get(start..start + 16) else {
            return Err(out_of_bounds_error!());
        };

        let mut buffer = [0u8; 16];
        buffer.copy_from_slice(bytes);
        Ok(buffer)
    }
}

/// Builder of a `#GUID` heap.
#[derive(Debug, Default)]
pub struct GuidBuilder {
    entries: Vec<[u8; 16]>,
}

impl GuidBuilder {
    /// Heap index of `value`, adding it on first use. The zero GUID is index 0.
    #[allow(clippy::cast_possible_truncation)]
    pub fn intern(&mut self, value: [u8; 16]) -> u32 {
        if value == [0; 16] {
            return 0;
        }
        if let Some(position) = self.entries.iter().position(|entry| *entry == value) {
            return position as u32 + 1;
        }

        self.entries.push(value);
        self.entries.len() as u32
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Heap bytes.
    #[must_use]
    pub fn finish(&self) -> Vec<u8> {
        self.entries.concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        let mvid = uguid::guid!("d437908e-65e6-487c-9735-7bdff699bea5");
        let mut data = mvid.to_bytes().to_vec();
        data.extend_from_slice(&[0xAA; 16]);

        let guids = Guid::from(&data).unwrap();
        assert_eq!(uguid::Guid::from_bytes(guids.get(1).unwrap()), mvid);
        assert_eq!(guids.get(2).unwrap(), [0xAA; 16]);
        assert_eq!(guids.get(0).unwrap(), [0; 16]);
        assert!(guids.get(3).is_err());
        assert!(Guid::from(&data[..20]).is_err());
    }

    #[test]
    fn builder_deduplicates() {
        let mut builder = GuidBuilder::default();
        assert_eq!(builder.intern([0; 16]), 0);
        assert_eq!(builder.intern([1; 16]), 1);
        assert_eq!(builder.intern([2; 16]), 2);
        assert_eq!(builder.intern([1; 16]), 1);
        assert_eq!(builder.finish().len(), 32);
    }
}
