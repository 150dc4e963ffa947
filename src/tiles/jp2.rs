//! JPEG2000 resolution-level discovery
//!
//! Reads just enough of a JP2 container (or bare codestream) to describe the
//! resolution pyramid: the SIZ marker for canvas and tile dimensions, and
//! the COD marker for the decomposition level count. Each decomposition
//! level halves both dimensions, so N levels yield N+1 usable resolutions.

use super::{TileDescriptor, TileParseError};

const MARKER_SOC: u16 = 0xFF4F;
const MARKER_SIZ: u16 = 0xFF51;
const MARKER_COD: u16 = 0xFF52;
const MARKER_SOT: u16 = 0xFF90;

const BOX_SIGNATURE: &[u8; 4] = b"jP\x20\x20";
const BOX_CODESTREAM: &[u8; 4] = b"jp2c";

/// Enumerate one [`TileDescriptor`] per resolution, full resolution first.
pub fn levels(data: &[u8]) -> Result<Vec<TileDescriptor>, TileParseError> {
    let codestream = if data.starts_with(&MARKER_SOC.to_be_bytes()) {
        data
    } else {
        locate_codestream(data)?
    };
    let header = parse_codestream(codestream)?;

    let mut levels = Vec::with_capacity(usize::from(header.decomposition_levels) + 1);
    for i in 0..=u32::from(header.decomposition_levels) {
        let width = halved(header.width, i);
        let height = halved(header.height, i);
        if width == 0 || height == 0 {
            break;
        }
        levels.push(TileDescriptor {
            width,
            height,
            tile_width: halved(header.tile_width, i).min(width),
            tile_height: halved(header.tile_height, i).min(height),
        });
    }
    Ok(levels)
}

/// ceil(value / 2^i)
fn halved(value: u32, i: u32) -> u32 {
    let divisor = 1u64 << i.min(31);
    u32::try_from((u64::from(value) + divisor - 1) / divisor).unwrap_or(0)
}

struct CodestreamHeader {
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    decomposition_levels: u8,
}

/// Walk JP2 boxes to the contiguous codestream box.
fn locate_codestream(data: &[u8]) -> Result<&[u8], TileParseError> {
    if data.len() < 12 || &data[4..8] != BOX_SIGNATURE {
        return Err(TileParseError::Malformed("missing JP2 signature box"));
    }
    let mut offset = 0usize;
    while offset + 8 <= data.len() {
        let lbox = u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap());
        let tbox: [u8; 4] = data[offset + 4..offset + 8].try_into().unwrap();
        let (header_len, content_len) = match lbox {
            0 => (8usize, data.len() - offset - 8),
            1 => {
                let xlbox = u64::from_be_bytes(
                    data.get(offset + 8..offset + 16)
                        .ok_or(TileParseError::Truncated("extended box length"))?
                        .try_into()
                        .unwrap(),
                );
                let xlbox = usize::try_from(xlbox)
                    .map_err(|_| TileParseError::Malformed("box length exceeds input"))?;
                if xlbox < 16 {
                    return Err(TileParseError::Malformed("bad extended box length"));
                }
                (16usize, xlbox - 16)
            }
            l if l >= 8 => (8usize, l as usize - 8),
            _ => return Err(TileParseError::Malformed("bad box length")),
        };
        let content_start = offset + header_len;
        let content_end = content_start
            .checked_add(content_len)
            .filter(|end| *end <= data.len())
            .ok_or(TileParseError::Truncated("box content"))?;
        if &tbox == BOX_CODESTREAM {
            return Ok(&data[content_start..content_end]);
        }
        offset = content_end;
    }
    Err(TileParseError::Malformed("no codestream box"))
}

/// Read SIZ and COD from the main header, stopping at the first tile-part.
fn parse_codestream(data: &[u8]) -> Result<CodestreamHeader, TileParseError> {
    if !data.starts_with(&MARKER_SOC.to_be_bytes()) {
        return Err(TileParseError::Malformed("codestream does not start with SOC"));
    }
    let mut siz: Option<(u32, u32, u32, u32)> = None;
    let mut decomposition_levels: Option<u8> = None;
    let mut offset = 2usize;

    while offset + 4 <= data.len() {
        let marker = u16::from_be_bytes(data[offset..offset + 2].try_into().unwrap());
        if marker == MARKER_SOT {
            break;
        }
        let seg_len =
            usize::from(u16::from_be_bytes(data[offset + 2..offset + 4].try_into().unwrap()));
        if seg_len < 2 {
            return Err(TileParseError::Malformed("bad marker segment length"));
        }
        let seg = data
            .get(offset + 4..offset + 2 + seg_len)
            .ok_or(TileParseError::Truncated("marker segment"))?;

        match marker {
            MARKER_SIZ => {
                // Rsiz(2) Xsiz(4) Ysiz(4) XOsiz(4) YOsiz(4) XTsiz(4) YTsiz(4)
                // XTOsiz(4) YTOsiz(4) ...
                if seg.len() < 34 {
                    return Err(TileParseError::Truncated("SIZ segment"));
                }
                let xsiz = be_u32(seg, 2);
                let ysiz = be_u32(seg, 6);
                let xosiz = be_u32(seg, 10);
                let yosiz = be_u32(seg, 14);
                let xtsiz = be_u32(seg, 18);
                let ytsiz = be_u32(seg, 22);
                if xsiz <= xosiz || ysiz <= yosiz || xtsiz == 0 || ytsiz == 0 {
                    return Err(TileParseError::Malformed("degenerate SIZ geometry"));
                }
                siz = Some((xsiz - xosiz, ysiz - yosiz, xtsiz, ytsiz));
            }
            MARKER_COD => {
                // Scod(1) SGcod: progression(1) layers(2) mct(1), SPcod:
                // decomposition levels(1) ...
                if seg.len() < 6 {
                    return Err(TileParseError::Truncated("COD segment"));
                }
                decomposition_levels = Some(seg[5]);
            }
            _ => {}
        }
        if let (Some(_), Some(_)) = (&siz, &decomposition_levels) {
            break;
        }
        offset += 2 + seg_len;
    }

    let (width, height, tile_width, tile_height) =
        siz.ok_or(TileParseError::Malformed("main header missing SIZ"))?;
    let decomposition_levels =
        decomposition_levels.ok_or(TileParseError::Malformed("main header missing COD"))?;
    Ok(CodestreamHeader {
        width,
        height,
        tile_width: tile_width.min(width),
        tile_height: tile_height.min(height),
        decomposition_levels,
    })
}

fn be_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal main header: SOC + SIZ + COD (+ SOT sentinel).
    fn codestream(
        width: u32,
        height: u32,
        tile_width: u32,
        tile_height: u32,
        decomposition_levels: u8,
    ) -> Vec<u8> {
        let mut out = MARKER_SOC.to_be_bytes().to_vec();

        out.extend_from_slice(&MARKER_SIZ.to_be_bytes());
        let mut siz = Vec::new();
        siz.extend_from_slice(&0u16.to_be_bytes()); // Rsiz
        siz.extend_from_slice(&width.to_be_bytes()); // Xsiz
        siz.extend_from_slice(&height.to_be_bytes()); // Ysiz
        siz.extend_from_slice(&0u32.to_be_bytes()); // XOsiz
        siz.extend_from_slice(&0u32.to_be_bytes()); // YOsiz
        siz.extend_from_slice(&tile_width.to_be_bytes()); // XTsiz
        siz.extend_from_slice(&tile_height.to_be_bytes()); // YTsiz
        siz.extend_from_slice(&0u32.to_be_bytes()); // XTOsiz
        siz.extend_from_slice(&0u32.to_be_bytes()); // YTOsiz
        siz.extend_from_slice(&1u16.to_be_bytes()); // Csiz
        siz.extend_from_slice(&[7, 1, 1]); // one component descriptor
        out.extend_from_slice(&((siz.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(&siz);

        out.extend_from_slice(&MARKER_COD.to_be_bytes());
        let cod = [
            0u8, // Scod
            0,   // progression order
            0, 1, // layers
            0, // MCT
            decomposition_levels,
            4, 4, 0, 0, // code-block size, style, transform
        ];
        out.extend_from_slice(&((cod.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(&cod);

        out.extend_from_slice(&MARKER_SOT.to_be_bytes());
        out.extend_from_slice(&10u16.to_be_bytes());
        out
    }

    fn jp2_container(codestream: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        // signature box
        out.extend_from_slice(&12u32.to_be_bytes());
        out.extend_from_slice(BOX_SIGNATURE);
        out.extend_from_slice(&[0x0D, 0x0A, 0x87, 0x0A]);
        // file type box
        out.extend_from_slice(&20u32.to_be_bytes());
        out.extend_from_slice(b"ftypjp2 \x00\x00\x00\x00jp2 ");
        // codestream box
        out.extend_from_slice(&((codestream.len() + 8) as u32).to_be_bytes());
        out.extend_from_slice(BOX_CODESTREAM);
        out.extend_from_slice(codestream);
        out
    }

    #[test]
    fn test_raw_codestream_levels() {
        let data = codestream(4096, 3072, 1024, 1024, 2);
        let levels = levels(&data).unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!((levels[0].width, levels[0].height), (4096, 3072));
        assert_eq!((levels[1].width, levels[1].height), (2048, 1536));
        assert_eq!((levels[2].width, levels[2].height), (1024, 768));
        assert_eq!(
            (levels[1].tile_width, levels[1].tile_height),
            (512, 512)
        );
    }

    #[test]
    fn test_container_wrapped_codestream() {
        let data = jp2_container(&codestream(640, 480, 640, 480, 0));
        let levels = levels(&data).unwrap();
        assert_eq!(levels, vec![TileDescriptor::untiled(640, 480)]);
    }

    #[test]
    fn test_odd_dimensions_round_up() {
        let data = codestream(65, 57, 65, 57, 1);
        let levels = levels(&data).unwrap();
        assert_eq!((levels[1].width, levels[1].height), (33, 29));
    }

    #[test]
    fn test_missing_cod_is_malformed() {
        let mut data = MARKER_SOC.to_be_bytes().to_vec();
        data.extend_from_slice(&MARKER_SOT.to_be_bytes());
        data.extend_from_slice(&10u16.to_be_bytes());
        assert!(levels(&data).is_err());
    }

    #[test]
    fn test_not_jp2_at_all() {
        assert!(levels(&[0xFF, 0xD8, 0xFF, 0xE0]).is_err());
        assert!(levels(b"II\x2A\x00").is_err());
    }

    #[test]
    fn test_untiled_when_tile_equals_canvas() {
        let data = codestream(64, 56, 4096, 4096, 0);
        let levels = levels(&data).unwrap();
        assert_eq!(levels, vec![TileDescriptor::untiled(64, 56)]);
    }
}
