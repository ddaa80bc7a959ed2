//! AVIF pixel size from the HEIF container.
//!
//! The `image` crate only decodes AVIF with the native dav1d library, so avatar checks read the
//! `ispe` (image spatial extents) property instead: `meta > iprp > ipco > ispe`.

const BRANDS: [&[u8; 4]; 2] = [b"avif", b"avis"];

/// ISO-BMFF boxes of one nesting level, as `(type, payload)`.
struct Boxes<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Boxes<'a> {
    type Item = ([u8; 4], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let header = self.rest.get(..8)?;
        let size = u32::from_be_bytes(header[..4].try_into().ok()?);
        let kind: [u8; 4] = header[4..8].try_into().ok()?;
        let (header_len, total) = match size {
            0 => (8, self.rest.len()),
            1 => {
                let large = u64::from_be_bytes(self.rest.get(8..16)?.try_into().ok()?);
                (16, usize::try_from(large).ok()?)
            }
            n => (8, usize::try_from(n).ok()?),
        };
        if total < header_len || total > self.rest.len() {
            self.rest = &[];
            return None;
        }
        let payload = &self.rest[header_len..total];
        self.rest = &self.rest[total..];
        Some((kind, payload))
    }
}

fn boxes(data: &[u8]) -> Boxes<'_> {
    Boxes { rest: data }
}

fn child<'a>(data: &'a [u8], kind: &[u8; 4]) -> Option<&'a [u8]> {
    boxes(data).find(|(k, _)| k == kind).map(|(_, payload)| payload)
}

fn is_avif(ftyp: &[u8]) -> bool {
    // major brand, minor version, then compatible brands
    let major = ftyp.get(..4).into_iter();
    let compatible = ftyp.get(8..).unwrap_or_default().chunks_exact(4);
    major
        .chain(compatible)
        .any(|brand| BRANDS.iter().any(|b| brand == b.as_slice()))
}

/// Width and height of the largest image in an AVIF file.
///
/// Auxiliary images (thumbnails, alpha planes) are never larger than the primary one.
pub(crate) fn dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let mut top = boxes(data);
    let (kind, ftyp) = top.next()?;
    if &kind != b"ftyp" || !is_avif(ftyp) {
        return None;
    }
    let meta = top.find(|(k, _)| k == b"meta").map(|(_, payload)| payload)?;
    // `meta` is a full box: skip version and flags
    let ipco = child(child(meta.get(4..)?, b"iprp")?, b"ipco")?;
    boxes(ipco)
        .filter(|(k, _)| k == b"ispe")
        .filter_map(|(_, payload)| {
            let width = u32::from_be_bytes(payload.get(4..8)?.try_into().ok()?);
            let height = u32::from_be_bytes(payload.get(8..12)?.try_into().ok()?);
            Some((width, height))
        })
        .max_by_key(|(w, h)| u64::from(*w) * u64::from(*h))
}
