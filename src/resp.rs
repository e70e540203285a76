use bytes::{Buf, BufMut, BytesMut};

/// Largest accepted bulk argument.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;
/// Largest accepted number of arguments in one request.
const MAX_MULTIBULK_LEN: usize = 1024 * 1024;
/// Longest inline request line.
const MAX_INLINE_LEN: usize = 64 * 1024;

/// A RESP2 reply.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    /// `None` is the null bulk string.
    BulkString(Option<Vec<u8>>),
    /// `None` is the null array.
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Vec<u8>>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    pub fn null_bulk_string() -> Self {
        RespValue::BulkString(None)
    }

    pub fn array(items: Vec<RespValue>) -> Self {
        RespValue::Array(Some(items))
    }

    /// An array of bulk strings.
    pub fn bulk_array<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Vec<u8>>,
    {
        RespValue::Array(Some(items.into_iter().map(RespValue::bulk_string).collect()))
    }

    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf
    }

    pub fn write_to(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, b'+', s.as_bytes()),
            RespValue::Error(s) => write_line(buf, b'-', s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, b':', n.to_string().as_bytes()),
            RespValue::BulkString(None) => buf.put_slice(b"$-1\r\n"),
            RespValue::BulkString(Some(data)) => {
                write_line(buf, b'$', data.len().to_string().as_bytes());
                buf.put_slice(data);
                buf.put_slice(b"\r\n");
            }
            RespValue::Array(None) => buf.put_slice(b"*-1\r\n"),
            RespValue::Array(Some(items)) => {
                write_line(buf, b'*', items.len().to_string().as_bytes());
                for item in items {
                    item.write_to(buf);
                }
            }
        }
    }
}

fn write_line(buf: &mut BytesMut, prefix: u8, body: &[u8]) {
    buf.put_u8(prefix);
    buf.put_slice(body);
    buf.put_slice(b"\r\n");
}

#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("expected '$', got '{}'", *.0 as char)]
    ExpectedBulk(u8),

    #[error("invalid multibulk length")]
    InvalidMultibulkLength,

    #[error("invalid bulk length")]
    InvalidBulkLength,

    #[error("too big inline request")]
    InlineTooLong,

    #[error("unbalanced quotes in request")]
    UnbalancedQuotes,
}

/// Streaming request parser.
///
/// A request is either a multibulk array of bulk strings or an inline
/// line. Nothing is consumed from the buffer until a whole request is
/// available.
pub struct RespParser;

impl RespParser {
    /// Parse one request into its arguments. `Ok(None)` means more bytes
    /// are needed. An empty argument list is a blank line and should be
    /// ignored by the caller.
    pub fn parse_request(buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        if buf.is_empty() {
            return Ok(None);
        }
        if buf[0] == b'*' {
            Self::parse_multibulk(buf)
        } else {
            Self::parse_inline(buf)
        }
    }

    fn parse_multibulk(buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        let Some((count, mut pos)) = read_header(&buf[..], 0, RespError::InvalidMultibulkLength)? else {
            return Ok(None);
        };
        if count < 0 {
            buf.advance(pos);
            return Ok(Some(Vec::new()));
        }
        let count = count as usize;
        if count > MAX_MULTIBULK_LEN {
            return Err(RespError::InvalidMultibulkLength);
        }

        // Locate every argument first; copy them out only once all arrived.
        let mut spans = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            match buf.get(pos) {
                None => return Ok(None),
                Some(b'$') => {}
                Some(&other) => return Err(RespError::ExpectedBulk(other)),
            }
            let Some((len, data_start)) = read_header(&buf[..], pos, RespError::InvalidBulkLength)? else {
                return Ok(None);
            };
            if len < 0 || len as usize > MAX_BULK_LEN {
                return Err(RespError::InvalidBulkLength);
            }
            let data_end = data_start + len as usize;
            if buf.len() < data_end + 2 {
                return Ok(None);
            }
            if &buf[data_end..data_end + 2] != b"\r\n" {
                return Err(RespError::InvalidBulkLength);
            }
            spans.push(data_start..data_end);
            pos = data_end + 2;
        }

        let args = spans.into_iter().map(|span| buf[span].to_vec()).collect();
        buf.advance(pos);
        Ok(Some(args))
    }

    fn parse_inline(buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        let Some(eol) = buf.iter().position(|&b| b == b'\n') else {
            if buf.len() > MAX_INLINE_LEN {
                return Err(RespError::InlineTooLong);
            }
            return Ok(None);
        };
        let line = buf.split_to(eol + 1);
        let line = line.strip_suffix(b"\r\n").or_else(|| line.strip_suffix(b"\n")).unwrap_or(&line);
        split_inline(line).map(Some)
    }
}

/// Parse `<type><integer>\r\n` at `start`, returning the integer and the
/// offset just past the line.
fn read_header(buf: &[u8], start: usize, err: RespError) -> Result<Option<(i64, usize)>, RespError> {
    let Some(cr) = buf[start..].windows(2).position(|w| w == b"\r\n") else {
        return Ok(None);
    };
    let digits = &buf[start + 1..start + cr];
    let n = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(err)?;
    Ok(Some((n, start + cr + 2)))
}

/// Tokenize an inline request. Double quotes allow `\"`, `\\`, `\n`, `\r`
/// and `\t` escapes; single quotes take their content literally.
fn split_inline(line: &[u8]) -> Result<Vec<Vec<u8>>, RespError> {
    let mut args = Vec::new();
    let mut i = 0;
    while i < line.len() {
        if line[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let mut arg = Vec::new();
        while i < line.len() && !line[i].is_ascii_whitespace() {
            match line[i] {
                quote @ (b'"' | b'\'') => {
                    i += 1;
                    loop {
                        let Some(&c) = line.get(i) else {
                            return Err(RespError::UnbalancedQuotes);
                        };
                        i += 1;
                        if c == quote {
                            break;
                        }
                        if c == b'\\' && quote == b'"' {
                            let Some(&esc) = line.get(i) else {
                                return Err(RespError::UnbalancedQuotes);
                            };
                            i += 1;
                            arg.push(match esc {
                                b'n' => b'\n',
                                b'r' => b'\r',
                                b't' => b'\t',
                                other => other,
                            });
                        } else {
                            arg.push(c);
                        }
                    }
                }
                c => {
                    arg.push(c);
                    i += 1;
                }
            }
        }
        args.push(arg);
    }
    Ok(args)
}
