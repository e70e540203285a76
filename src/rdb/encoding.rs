//! Compact container encodings embedded in RDB string blobs: ziplist,
//! listpack and intset, plus LZF-compressed strings.
//!
//! Integer entries are returned as their decimal text, which is how the
//! values are stored once decoded.

use super::{RdbError, RdbResult};

/// Bounds-checked cursor over a container blob.
struct Blob<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Blob<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Blob { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> RdbResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(RdbError::Corrupt("container entry out of bounds"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn peek(&self) -> RdbResult<u8> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(RdbError::Corrupt("container is not terminated"))
    }

    fn u8(&mut self) -> RdbResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> RdbResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

fn int_entry(v: i64) -> Vec<u8> {
    v.to_string().into_bytes()
}

fn i24_le(b: [u8; 3]) -> i64 {
    // Sign-extend through the top byte of an i32.
    (i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8) as i64
}

const ZIPLIST_HEADER: usize = 10;
const ZIPLIST_END: u8 = 0xFF;
const ZIP_BIG_PREVLEN: u8 = 0xFE;

const ZIP_INT_16B: u8 = 0xC0;
const ZIP_INT_32B: u8 = 0xD0;
const ZIP_INT_64B: u8 = 0xE0;
const ZIP_INT_24B: u8 = 0xF0;
const ZIP_INT_8B: u8 = 0xFE;

/// Decode every entry of a ziplist.
pub fn ziplist_entries(buf: &[u8]) -> RdbResult<Vec<Vec<u8>>> {
    let mut blob = Blob::new(buf);
    let zlbytes = u32::from_le_bytes(blob.array()?) as usize;
    let _zltail = u32::from_le_bytes(blob.array::<4>()?);
    let zllen = u16::from_le_bytes(blob.array()?);
    debug_assert_eq!(blob.pos, ZIPLIST_HEADER);
    if zlbytes != buf.len() {
        return Err(RdbError::Corrupt("ziplist size mismatch"));
    }

    let mut entries = Vec::with_capacity(zllen as usize);
    while blob.peek()? != ZIPLIST_END {
        // previous entry length, 1 or 5 bytes
        if blob.u8()? == ZIP_BIG_PREVLEN {
            blob.take(4)?;
        }
        let enc = blob.u8()?;
        let entry = match enc >> 6 {
            0 => blob.take((enc & 0x3F) as usize)?.to_vec(),
            1 => {
                let len = (((enc & 0x3F) as usize) << 8) | blob.u8()? as usize;
                blob.take(len)?.to_vec()
            }
            2 => {
                let len = u32::from_be_bytes(blob.array()?) as usize;
                blob.take(len)?.to_vec()
            }
            _ => match enc {
                ZIP_INT_16B => int_entry(i16::from_le_bytes(blob.array()?) as i64),
                ZIP_INT_32B => int_entry(i32::from_le_bytes(blob.array()?) as i64),
                ZIP_INT_64B => int_entry(i64::from_le_bytes(blob.array()?)),
                ZIP_INT_24B => int_entry(i24_le(blob.array()?)),
                ZIP_INT_8B => int_entry(blob.u8()? as i8 as i64),
                0xF1..=0xFD => int_entry((enc & 0x0F) as i64 - 1),
                _ => return Err(RdbError::Corrupt("unknown ziplist encoding")),
            },
        };
        entries.push(entry);
    }
    Ok(entries)
}

const LISTPACK_HEADER: usize = 6;
const LISTPACK_END: u8 = 0xFF;

/// Size of the back-length trailer that follows a listpack entry of
/// `entry_len` bytes (encoding + payload).
fn listpack_backlen_size(entry_len: usize) -> usize {
    match entry_len {
        0..=127 => 1,
        128..=16382 => 2,
        16383..=2097150 => 3,
        2097151..=268435454 => 4,
        _ => 5,
    }
}

/// Decode every entry of a listpack.
pub fn listpack_entries(buf: &[u8]) -> RdbResult<Vec<Vec<u8>>> {
    let mut blob = Blob::new(buf);
    let total = u32::from_le_bytes(blob.array()?) as usize;
    let count = u16::from_le_bytes(blob.array()?);
    debug_assert_eq!(blob.pos, LISTPACK_HEADER);
    if total != buf.len() {
        return Err(RdbError::Corrupt("listpack size mismatch"));
    }

    let mut entries = Vec::with_capacity(count as usize);
    while blob.peek()? != LISTPACK_END {
        let start = blob.pos;
        let b = blob.u8()?;
        let entry = if b & 0x80 == 0 {
            int_entry((b & 0x7F) as i64)
        } else if b & 0xC0 == 0x80 {
            blob.take((b & 0x3F) as usize)?.to_vec()
        } else if b & 0xE0 == 0xC0 {
            let raw = (((b & 0x1F) as i64) << 8) | blob.u8()? as i64;
            int_entry(if raw >= 1 << 12 { raw - (1 << 13) } else { raw })
        } else if b & 0xF0 == 0xE0 {
            let len = (((b & 0x0F) as usize) << 8) | blob.u8()? as usize;
            blob.take(len)?.to_vec()
        } else {
            match b {
                0xF0 => {
                    let len = u32::from_le_bytes(blob.array()?) as usize;
                    blob.take(len)?.to_vec()
                }
                0xF1 => int_entry(i16::from_le_bytes(blob.array()?) as i64),
                0xF2 => int_entry(i24_le(blob.array()?)),
                0xF3 => int_entry(i32::from_le_bytes(blob.array()?) as i64),
                0xF4 => int_entry(i64::from_le_bytes(blob.array()?)),
                _ => return Err(RdbError::Corrupt("unknown listpack encoding")),
            }
        };
        blob.take(listpack_backlen_size(blob.pos - start))?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Decode the members of an intset.
pub fn intset_members(buf: &[u8]) -> RdbResult<Vec<Vec<u8>>> {
    let mut blob = Blob::new(buf);
    let width = u32::from_le_bytes(blob.array()?) as usize;
    let len = u32::from_le_bytes(blob.array()?) as usize;
    if !matches!(width, 2 | 4 | 8) {
        return Err(RdbError::Corrupt("unknown intset encoding"));
    }
    if buf.len() != 8 + width * len {
        return Err(RdbError::Corrupt("intset size mismatch"));
    }

    let mut members = Vec::with_capacity(len);
    for _ in 0..len {
        let v = match width {
            2 => i16::from_le_bytes(blob.array()?) as i64,
            4 => i32::from_le_bytes(blob.array()?) as i64,
            _ => i64::from_le_bytes(blob.array()?),
        };
        members.push(int_entry(v));
    }
    Ok(members)
}

/// Largest string an LZF blob may inflate to (the default proto-max-bulk-len).
pub const MAX_LZF_LEN: usize = 512 * 1024 * 1024;

/// An LZF back-reference emits at most 264 bytes for 3 input bytes.
const LZF_MAX_RATIO: usize = 88;

/// Inflate an LZF-compressed string of known uncompressed length.
///
/// `len` comes from the payload and is checked before anything is allocated.
pub fn lzf_decompress(compressed: &[u8], len: usize) -> RdbResult<Vec<u8>> {
    if len > MAX_LZF_LEN || len > compressed.len().saturating_mul(LZF_MAX_RATIO) {
        return Err(RdbError::Corrupt("lzf length out of range"));
    }
    let out = lzf::decompress(compressed, len).map_err(|e| RdbError::Lzf(format!("{e:?}")))?;
    if out.len() != len {
        return Err(RdbError::Corrupt("lzf length mismatch"));
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a ziplist from already-encoded entries (encoding + payload).
    pub(crate) fn ziplist(encoded: &[Vec<u8>]) -> Vec<u8> {
        let mut body = Vec::new();
        let mut prev = 0usize;
        for e in encoded {
            if prev < 254 {
                body.push(prev as u8);
            } else {
                body.push(ZIP_BIG_PREVLEN);
                body.extend_from_slice(&(prev as u32).to_le_bytes());
            }
            body.extend_from_slice(e);
            prev = e.len() + if prev < 254 { 1 } else { 5 };
        }
        let total = ZIPLIST_HEADER + body.len() + 1;
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(encoded.len() as u16).to_le_bytes());
        out.extend_from_slice(&body);
        out.push(ZIPLIST_END);
        out
    }

    pub(crate) fn zip_str(s: &[u8]) -> Vec<u8> {
        assert!(s.len() < 64);
        let mut e = vec![s.len() as u8];
        e.extend_from_slice(s);
        e
    }

    /// Build a listpack from already-encoded entries (encoding + payload).
    pub(crate) fn listpack(encoded: &[Vec<u8>]) -> Vec<u8> {
        let mut body = Vec::new();
        for e in encoded {
            body.extend_from_slice(e);
            // Content of the back-length is never read, only its size.
            body.extend(std::iter::repeat_n(0u8, listpack_backlen_size(e.len())));
        }
        let total = LISTPACK_HEADER + body.len() + 1;
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(encoded.len() as u16).to_le_bytes());
        out.extend_from_slice(&body);
        out.push(LISTPACK_END);
        out
    }

    pub(crate) fn lp_str(s: &[u8]) -> Vec<u8> {
        assert!(s.len() < 64);
        let mut e = vec![0x80 | s.len() as u8];
        e.extend_from_slice(s);
        e
    }

    fn texts(entries: Vec<Vec<u8>>) -> Vec<String> {
        entries.into_iter().map(|e| String::from_utf8(e).unwrap()).collect()
    }

    #[test]
    fn test_ziplist_strings_and_integers() {
        let mut long = vec![0x40, 100];
        long.extend(std::iter::repeat_n(b'x', 100));
        let mut i24 = vec![ZIP_INT_24B];
        i24.extend_from_slice(&(-70000i32).to_le_bytes()[..3]);
        let blob = ziplist(&[
            zip_str(b"hello"),
            vec![0xF1],
            vec![0xFD],
            vec![ZIP_INT_8B, (-5i8) as u8],
            [vec![ZIP_INT_16B], 1000i16.to_le_bytes().to_vec()].concat(),
            [vec![ZIP_INT_32B], 100000i32.to_le_bytes().to_vec()].concat(),
            [vec![ZIP_INT_64B], i64::MIN.to_le_bytes().to_vec()].concat(),
            i24,
            long,
        ]);
        let entries = texts(ziplist_entries(&blob).unwrap());
        assert_eq!(
            &entries[..8],
            &["hello", "0", "12", "-5", "1000", "100000", i64::MIN.to_string().as_str(), "-70000"]
        );
        assert_eq!(entries[8], "x".repeat(100));
    }

    #[test]
    fn test_ziplist_big_prevlen() {
        let mut big = vec![0x40 | 1, 44]; // 300-byte string
        big.extend(std::iter::repeat_n(b'y', 300));
        let blob = ziplist(&[big, zip_str(b"after")]);
        let entries = ziplist_entries(&blob).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1], b"after");
    }

    #[test]
    fn test_ziplist_truncated() {
        let mut blob = ziplist(&[zip_str(b"hello")]);
        blob.truncate(blob.len() - 3);
        assert!(ziplist_entries(&blob).is_err());
    }

    #[test]
    fn test_listpack_encodings() {
        let mut str12 = vec![0xE0 | 0x01, 0x2C]; // 300-byte string
        str12.extend(std::iter::repeat_n(b'z', 300));
        let blob = listpack(&[
            lp_str(b"field"),
            vec![0x05],
            // 13-bit -1
            vec![0xC0 | 0x1F, 0xFF],
            [vec![0xF1], (-300i16).to_le_bytes().to_vec()].concat(),
            [vec![0xF2], 5_000_000i32.to_le_bytes()[..3].to_vec()].concat(),
            [vec![0xF3], (-7i32).to_le_bytes().to_vec()].concat(),
            [vec![0xF4], (1i64 << 40).to_le_bytes().to_vec()].concat(),
            str12,
        ]);
        let entries = texts(listpack_entries(&blob).unwrap());
        assert_eq!(
            &entries[..7],
            &["field", "5", "-1", "-300", "5000000", "-7", (1i64 << 40).to_string().as_str()]
        );
        assert_eq!(entries[7], "z".repeat(300));
    }

    #[test]
    fn test_listpack_unknown_encoding() {
        let blob = listpack(&[vec![0xF5]]);
        assert!(matches!(listpack_entries(&blob), Err(RdbError::Corrupt(_))));
    }

    #[test]
    fn test_intset() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&4u32.to_le_bytes());
        blob.extend_from_slice(&3u32.to_le_bytes());
        for v in [-1i32, 7, 70000] {
            blob.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(texts(intset_members(&blob).unwrap()), vec!["-1", "7", "70000"]);

        blob.pop();
        assert!(intset_members(&blob).is_err());
    }

    #[test]
    fn test_lzf() {
        let data = b"abcabcabcabcabcabcabcabcabcabcabcabc".to_vec();
        let compressed = lzf::compress(&data).unwrap();
        assert_eq!(lzf_decompress(&compressed, data.len()).unwrap(), data);
        assert!(lzf_decompress(&compressed, 3).is_err());
    }
}
