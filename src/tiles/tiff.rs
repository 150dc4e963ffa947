//! TIFF resolution-level discovery
//!
//! Walks the IFD chain of a classic or BigTIFF file, in either byte order,
//! reading only the handful of tags needed to describe the pyramid:
//! ImageWidth/ImageLength and, when present, TileWidth/TileLength. Pixel
//! data is never touched.

use super::{TileDescriptor, TileParseError};

const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_TILE_WIDTH: u16 = 322;
const TAG_TILE_LENGTH: u16 = 323;

const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;
const TYPE_LONG8: u16 = 16;

/// Cycle/garbage guard; real pyramids rarely exceed a dozen levels.
const MAX_IFDS: usize = 64;

/// Enumerate one [`TileDescriptor`] per IFD, ordered from highest to lowest
/// resolution.
pub fn levels(data: &[u8]) -> Result<Vec<TileDescriptor>, TileParseError> {
    let reader = Reader::new(data)?;
    let mut levels = Vec::new();
    let mut offset = reader.first_ifd_offset;
    let mut visited = 0usize;

    while offset != 0 {
        if visited >= MAX_IFDS {
            return Err(TileParseError::Malformed("IFD chain does not terminate"));
        }
        visited += 1;
        let ifd = reader.read_ifd(offset)?;
        levels.push(ifd.descriptor()?);
        offset = ifd.next_offset;
    }

    if levels.is_empty() {
        return Err(TileParseError::Malformed("no IFDs present"));
    }
    // Pyramids conventionally store levels largest-first, but nothing
    // enforces it; the contract does.
    levels.sort_by(|a, b| (b.width, b.height).cmp(&(a.width, a.height)));
    Ok(levels)
}

struct Reader<'a> {
    data: &'a [u8],
    big_endian: bool,
    bigtiff: bool,
    first_ifd_offset: u64,
}

struct Ifd {
    width: Option<u32>,
    height: Option<u32>,
    tile_width: Option<u32>,
    tile_height: Option<u32>,
    next_offset: u64,
}

impl Ifd {
    fn descriptor(&self) -> Result<TileDescriptor, TileParseError> {
        let width = self
            .width
            .ok_or(TileParseError::Malformed("IFD missing ImageWidth"))?;
        let height = self
            .height
            .ok_or(TileParseError::Malformed("IFD missing ImageLength"))?;
        if width == 0 || height == 0 {
            return Err(TileParseError::Malformed("zero-sized IFD"));
        }
        match (self.tile_width, self.tile_height) {
            (Some(tw), Some(th)) if tw > 0 && th > 0 => Ok(TileDescriptor {
                width,
                height,
                tile_width: tw.min(width),
                tile_height: th.min(height),
            }),
            (None, None) => Ok(TileDescriptor::untiled(width, height)),
            _ => Err(TileParseError::Malformed(
                "TileWidth/TileLength must appear together",
            )),
        }
    }
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Result<Self, TileParseError> {
        let big_endian = match data.get(0..2) {
            Some(b"II") => false,
            Some(b"MM") => true,
            _ => return Err(TileParseError::Malformed("not a TIFF byte-order mark")),
        };
        let mut reader = Reader {
            data,
            big_endian,
            bigtiff: false,
            first_ifd_offset: 0,
        };
        match reader.u16_at(2)? {
            42 => {
                reader.first_ifd_offset = u64::from(reader.u32_at(4)?);
            }
            43 => {
                reader.bigtiff = true;
                if reader.u16_at(4)? != 8 || reader.u16_at(6)? != 0 {
                    return Err(TileParseError::Malformed("bad BigTIFF header"));
                }
                reader.first_ifd_offset = reader.u64_at(8)?;
            }
            _ => return Err(TileParseError::Malformed("bad TIFF magic number")),
        }
        Ok(reader)
    }

    fn read_ifd(&self, offset: u64) -> Result<Ifd, TileParseError> {
        let (entry_count, entries_start, entry_size) = if self.bigtiff {
            (self.u64_at(offset)?, offset + 8, 20u64)
        } else {
            (u64::from(self.u16_at(offset)?), offset + 2, 12u64)
        };
        if entry_count > 4096 {
            return Err(TileParseError::Malformed("implausible IFD entry count"));
        }

        let mut ifd = Ifd {
            width: None,
            height: None,
            tile_width: None,
            tile_height: None,
            next_offset: 0,
        };
        for i in 0..entry_count {
            let entry = entries_start + i * entry_size;
            let tag = self.u16_at(entry)?;
            let slot = match tag {
                TAG_IMAGE_WIDTH => &mut ifd.width,
                TAG_IMAGE_LENGTH => &mut ifd.height,
                TAG_TILE_WIDTH => &mut ifd.tile_width,
                TAG_TILE_LENGTH => &mut ifd.tile_height,
                _ => continue,
            };
            *slot = Some(self.entry_value(entry)?);
        }

        let after_entries = entries_start + entry_count * entry_size;
        ifd.next_offset = if self.bigtiff {
            self.u64_at(after_entries)?
        } else {
            u64::from(self.u32_at(after_entries)?)
        };
        Ok(ifd)
    }

    /// Scalar value of an IFD entry. The tags this parser reads always have
    /// count 1 and therefore fit in the inline value field.
    fn entry_value(&self, entry: u64) -> Result<u32, TileParseError> {
        let field_type = self.u16_at(entry + 2)?;
        let (count, value_offset) = if self.bigtiff {
            (self.u64_at(entry + 4)?, entry + 12)
        } else {
            (u64::from(self.u32_at(entry + 4)?), entry + 8)
        };
        if count != 1 {
            return Err(TileParseError::Malformed("dimension tag with count != 1"));
        }
        let value = match field_type {
            TYPE_SHORT => u64::from(self.u16_at(value_offset)?),
            TYPE_LONG => u64::from(self.u32_at(value_offset)?),
            TYPE_LONG8 if self.bigtiff => self.u64_at(value_offset)?,
            _ => return Err(TileParseError::Malformed("unexpected dimension tag type")),
        };
        u32::try_from(value).map_err(|_| TileParseError::Malformed("dimension exceeds u32"))
    }

    fn bytes_at(&self, offset: u64, len: usize) -> Result<&'a [u8], TileParseError> {
        let start = usize::try_from(offset)
            .map_err(|_| TileParseError::Truncated("offset beyond addressable range"))?;
        let end = start
            .checked_add(len)
            .ok_or(TileParseError::Truncated("offset beyond addressable range"))?;
        self.data
            .get(start..end)
            .ok_or(TileParseError::Truncated("TIFF structure"))
    }

    fn u16_at(&self, offset: u64) -> Result<u16, TileParseError> {
        let bytes: [u8; 2] = self.bytes_at(offset, 2)?.try_into().unwrap();
        Ok(if self.big_endian {
            u16::from_be_bytes(bytes)
        } else {
            u16::from_le_bytes(bytes)
        })
    }

    fn u32_at(&self, offset: u64) -> Result<u32, TileParseError> {
        let bytes: [u8; 4] = self.bytes_at(offset, 4)?.try_into().unwrap();
        Ok(if self.big_endian {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        })
    }

    fn u64_at(&self, offset: u64) -> Result<u64, TileParseError> {
        let bytes: [u8; 8] = self.bytes_at(offset, 8)?.try_into().unwrap();
        Ok(if self.big_endian {
            u64::from_be_bytes(bytes)
        } else {
            u64::from_le_bytes(bytes)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal little-endian classic TIFF builder for tests. Writes IFDs
    /// with only the tags this parser reads.
    struct TiffBuilder {
        ifds: Vec<Vec<(u16, u32)>>,
    }

    impl TiffBuilder {
        fn new() -> Self {
            Self { ifds: Vec::new() }
        }

        fn ifd(mut self, tags: &[(u16, u32)]) -> Self {
            self.ifds.push(tags.to_vec());
            self
        }

        fn build(self) -> Vec<u8> {
            let mut out = vec![b'I', b'I', 42, 0, 0, 0, 0, 0];
            let mut next_ifd_field = 4usize;
            for tags in &self.ifds {
                let offset = out.len() as u32;
                out[next_ifd_field..next_ifd_field + 4].copy_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(&(tags.len() as u16).to_le_bytes());
                for (tag, value) in tags {
                    out.extend_from_slice(&tag.to_le_bytes());
                    out.extend_from_slice(&TYPE_LONG.to_le_bytes());
                    out.extend_from_slice(&1u32.to_le_bytes());
                    out.extend_from_slice(&value.to_le_bytes());
                }
                next_ifd_field = out.len();
                out.extend_from_slice(&0u32.to_le_bytes());
            }
            out
        }
    }

    #[test]
    fn test_untiled_single_ifd() {
        let data = TiffBuilder::new()
            .ifd(&[(TAG_IMAGE_WIDTH, 64), (TAG_IMAGE_LENGTH, 56)])
            .build();
        let levels = levels(&data).unwrap();
        assert_eq!(levels, vec![TileDescriptor::untiled(64, 56)]);
    }

    #[test]
    fn test_tiled_pyramid_multiple_ifds() {
        let data = TiffBuilder::new()
            .ifd(&[
                (TAG_IMAGE_WIDTH, 4096),
                (TAG_IMAGE_LENGTH, 3072),
                (TAG_TILE_WIDTH, 256),
                (TAG_TILE_LENGTH, 256),
            ])
            .ifd(&[
                (TAG_IMAGE_WIDTH, 2048),
                (TAG_IMAGE_LENGTH, 1536),
                (TAG_TILE_WIDTH, 256),
                (TAG_TILE_LENGTH, 256),
            ])
            .ifd(&[
                (TAG_IMAGE_WIDTH, 1024),
                (TAG_IMAGE_LENGTH, 768),
                (TAG_TILE_WIDTH, 256),
                (TAG_TILE_LENGTH, 256),
            ])
            .build();
        let levels = levels(&data).unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0].width, 4096);
        assert_eq!(levels[2].width, 1024);
        assert!(levels.iter().all(|l| l.is_tiled()));
        assert!(levels.iter().all(|l| l.tile_width == 256));
    }

    #[test]
    fn test_levels_sorted_highest_resolution_first() {
        // smallest level stored first; the parser reorders
        let data = TiffBuilder::new()
            .ifd(&[(TAG_IMAGE_WIDTH, 512), (TAG_IMAGE_LENGTH, 384)])
            .ifd(&[(TAG_IMAGE_WIDTH, 2048), (TAG_IMAGE_LENGTH, 1536)])
            .build();
        let levels = levels(&data).unwrap();
        assert_eq!(levels[0].width, 2048);
        assert_eq!(levels[1].width, 512);
    }

    #[test]
    fn test_tile_tag_without_partner_is_malformed() {
        let data = TiffBuilder::new()
            .ifd(&[
                (TAG_IMAGE_WIDTH, 64),
                (TAG_IMAGE_LENGTH, 56),
                (TAG_TILE_WIDTH, 16),
            ])
            .build();
        assert!(levels(&data).is_err());
    }

    #[test]
    fn test_not_a_tiff() {
        assert!(levels(&[0xFF, 0xD8, 0xFF, 0xE0]).is_err());
        assert!(levels(b"II\x2A\x00").is_err());
        assert!(levels(&[]).is_err());
    }

    #[test]
    fn test_big_endian_header() {
        let mut data = vec![b'M', b'M', 0, 42, 0, 0, 0, 8];
        // one IFD at offset 8 with two LONG entries
        data.extend_from_slice(&2u16.to_be_bytes());
        for (tag, value) in [(TAG_IMAGE_WIDTH, 64u32), (TAG_IMAGE_LENGTH, 56)] {
            data.extend_from_slice(&tag.to_be_bytes());
            data.extend_from_slice(&TYPE_LONG.to_be_bytes());
            data.extend_from_slice(&1u32.to_be_bytes());
            data.extend_from_slice(&value.to_be_bytes());
        }
        data.extend_from_slice(&0u32.to_be_bytes());
        assert_eq!(levels(&data).unwrap(), vec![TileDescriptor::untiled(64, 56)]);
    }

    #[test]
    fn test_cyclic_ifd_chain_detected() {
        // IFD whose next-IFD pointer loops back to itself
        let mut data = TiffBuilder::new()
            .ifd(&[(TAG_IMAGE_WIDTH, 64), (TAG_IMAGE_LENGTH, 56)])
            .build();
        let len = data.len();
        data[len - 4..].copy_from_slice(&8u32.to_le_bytes());
        assert!(levels(&data).is_err());
    }
}
