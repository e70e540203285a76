//! Sequential byte sources for the RDB decoder.
//!
//! Both sources fold every byte they hand out into a running CRC-64, so the
//! decoder can compare the trailing checksum of a file against what it has
//! actually consumed.

use crc::{CRC_64_REDIS, Crc, Digest};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// CRC-64 (Jones polynomial, reflected) as used by DUMP payloads and RDB files.
pub static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_REDIS);

pub fn crc64(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

/// A readable source that knows the checksum of everything read so far.
pub trait RdbStream: Read {
    fn checksum(&self) -> u64;
}

/// An in-memory RDB image, e.g. the body of a DUMP payload.
pub struct StringStream {
    data: Vec<u8>,
    pos: usize,
    digest: Digest<'static, u64>,
}

impl StringStream {
    pub fn new(data: Vec<u8>) -> Self {
        StringStream {
            data,
            pos: 0,
            digest: CRC64.digest(),
        }
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

impl Read for StringStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining());
        let chunk = &self.data[self.pos..self.pos + n];
        buf[..n].copy_from_slice(chunk);
        self.digest.update(chunk);
        self.pos += n;
        Ok(n)
    }
}

impl RdbStream for StringStream {
    fn checksum(&self) -> u64 {
        self.digest.clone().finalize()
    }
}

/// An RDB file on disk, read through a buffer. Closed when dropped.
pub struct FileStream {
    reader: BufReader<File>,
    digest: Digest<'static, u64>,
}

impl FileStream {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(FileStream {
            reader: BufReader::new(file),
            digest: CRC64.digest(),
        })
    }
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        self.digest.update(&buf[..n]);
        Ok(n)
    }
}

impl RdbStream for FileStream {
    fn checksum(&self) -> u64 {
        self.digest.clone().finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_crc64_check_value() {
        assert_eq!(crc64(b"123456789"), 0xe9c6d914c4b8d9ca);
    }

    #[test]
    fn test_string_stream_running_checksum() {
        let mut stream = StringStream::new(b"123456789tail".to_vec());
        assert_eq!(stream.checksum(), crc64(b""));
        let mut buf = [0u8; 9];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(stream.checksum(), 0xe9c6d914c4b8d9ca);
        assert_eq!(stream.remaining(), 4);

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"tail");
        assert_eq!(stream.checksum(), crc64(b"123456789tail"));
    }

    #[test]
    fn test_short_read_is_eof() {
        let mut stream = StringStream::new(vec![1, 2]);
        let mut buf = [0u8; 3];
        let err = stream.read_exact(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_file_stream() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"123456789").unwrap();
        file.flush().unwrap();

        let mut stream = FileStream::open(file.path()).unwrap();
        let mut data = Vec::new();
        stream.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"123456789");
        assert_eq!(stream.checksum(), 0xe9c6d914c4b8d9ca);
    }

    #[test]
    fn test_file_stream_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileStream::open(dir.path().join("missing.rdb")).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
