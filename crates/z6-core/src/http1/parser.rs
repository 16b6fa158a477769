//! HTTP/1.1 response parser.
//!
//! Input is the raw byte buffer accumulated from a connection; output is
//! a [`ParsedResponse`] borrowing header slices from the input
//! (zero-copy), or a typed [`ParseError`]. Chunked bodies are the one
//! place an owned buffer is assembled.
//!
//! [`ParseError::IncompleteResponse`] means "keep reading": the engine
//! leaves the buffer in place and retries on a later tick.

use std::borrow::Cow;

use crate::error::ParseError;

/// Maximum number of response headers.
pub const MAX_HEADERS: usize = 100;
/// Maximum size of a single header line.
pub const MAX_HEADER_LEN: usize = 8 * 1024;
/// Maximum response body size.
pub const MAX_BODY_LEN: usize = 10 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// One response header, borrowing from the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

/// A fully parsed response.
#[derive(Debug)]
pub struct ParsedResponse<'a> {
    pub status_code: u16,
    pub headers: Vec<Header<'a>>,
    /// Borrowed for fixed-length bodies; owned for chunked bodies.
    pub body: Cow<'a, [u8]>,
    /// Bytes of `input` this response occupied, including the body.
    pub bytes_consumed: usize,
    /// HTTP/1.1 defaults to keep-alive unless `Connection: close`.
    pub keep_alive: bool,
}

impl<'a> ParsedResponse<'a> {
    /// First header with the given name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value)
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse one response from the front of `input`.
pub fn parse_response(input: &[u8]) -> Result<ParsedResponse<'_>, ParseError> {
    let (status_code, mut offset) = parse_status_line(input)?;
    let mut headers = Vec::new();

    loop {
        let line_end = match find_crlf(&input[offset..]) {
            Some(rel) => offset + rel,
            None => {
                if input.len() - offset > MAX_HEADER_LEN {
                    return Err(ParseError::HeaderTooLarge);
                }
                return Err(ParseError::IncompleteResponse);
            }
        };
        let line = &input[offset..line_end];
        offset = line_end + 2;
        if line.is_empty() {
            break;
        }
        if line.len() > MAX_HEADER_LEN {
            return Err(ParseError::HeaderTooLarge);
        }
        if headers.len() >= MAX_HEADERS {
            return Err(ParseError::TooManyHeaders);
        }
        headers.push(parse_header_line(line)?);
    }

    let keep_alive = !header_value(&headers, "connection")
        .map(|v| v.eq_ignore_ascii_case("close"))
        .unwrap_or(false);

    if let Some(encoding) = header_value(&headers, "transfer-encoding") {
        if !encoding.eq_ignore_ascii_case("chunked") {
            return Err(ParseError::UnsupportedTransferEncoding);
        }
        let (body, consumed) = parse_chunked_body(&input[offset..])?;
        return Ok(ParsedResponse {
            status_code,
            headers,
            body: Cow::Owned(body),
            bytes_consumed: offset + consumed,
            keep_alive,
        });
    }

    if let Some(length) = header_value(&headers, "content-length") {
        let length: usize = length
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidHeader)?;
        if length > MAX_BODY_LEN {
            return Err(ParseError::BodyTooLarge);
        }
        if input.len() < offset + length {
            return Err(ParseError::IncompleteResponse);
        }
        return Ok(ParsedResponse {
            status_code,
            headers,
            body: Cow::Borrowed(&input[offset..offset + length]),
            bytes_consumed: offset + length,
            keep_alive,
        });
    }

    // No framing header: zero-length body. Read-until-close bodies have
    // no deterministic tick semantics and are not modelled.
    Ok(ParsedResponse {
        status_code,
        headers,
        body: Cow::Borrowed(&[]),
        bytes_consumed: offset,
        keep_alive,
    })
}

// ---------------------------------------------------------------------------
// Pieces
// ---------------------------------------------------------------------------

/// Parse `HTTP/1.1 <3-digit code> <reason>\r\n`; returns the code and the
/// offset just past the CRLF.
fn parse_status_line(input: &[u8]) -> Result<(u16, usize), ParseError> {
    const PREFIX: &[u8] = b"HTTP/1.1 ";

    let line_end = match find_crlf(input) {
        Some(end) => end,
        None => {
            // A status line longer than a header line is garbage, not
            // a partial read.
            if input.len() > MAX_HEADER_LEN {
                return Err(ParseError::InvalidStatusLine);
            }
            if input.len() >= PREFIX.len() && !input.starts_with(PREFIX) {
                return Err(ParseError::InvalidStatusLine);
            }
            return Err(ParseError::IncompleteResponse);
        }
    };
    let line = &input[..line_end];

    if !line.starts_with(PREFIX) {
        return Err(ParseError::InvalidStatusLine);
    }
    let rest = &line[PREFIX.len()..];
    if rest.len() < 3 || !rest[..3].iter().all(u8::is_ascii_digit) {
        return Err(ParseError::InvalidStatusLine);
    }
    // The code is exactly three digits, followed by the reason phrase
    // (or nothing).
    if rest.len() > 3 && rest[3] != b' ' {
        return Err(ParseError::InvalidStatusLine);
    }
    let code = (rest[0] - b'0') as u16 * 100 + (rest[1] - b'0') as u16 * 10 + (rest[2] - b'0') as u16;
    if !(100..600).contains(&code) {
        return Err(ParseError::InvalidStatusLine);
    }
    Ok((code, line_end + 2))
}

fn parse_header_line(line: &[u8]) -> Result<Header<'_>, ParseError> {
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or(ParseError::InvalidHeader)?;
    if colon == 0 {
        return Err(ParseError::InvalidHeader);
    }
    let name = std::str::from_utf8(&line[..colon]).map_err(|_| ParseError::InvalidHeader)?;
    if name.contains(' ') || name.contains('\t') {
        return Err(ParseError::InvalidHeader);
    }
    let mut value_start = colon + 1;
    while value_start < line.len() && (line[value_start] == b' ' || line[value_start] == b'\t') {
        value_start += 1;
    }
    let value =
        std::str::from_utf8(&line[value_start..]).map_err(|_| ParseError::InvalidHeader)?;
    Ok(Header { name, value })
}

fn header_value<'a>(headers: &[Header<'a>], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value)
}

/// Assemble a chunked body into an owned buffer. Returns the body and the
/// number of input bytes consumed (through the terminal CRLF).
fn parse_chunked_body(input: &[u8]) -> Result<(Vec<u8>, usize), ParseError> {
    let mut body = Vec::new();
    let mut offset = 0;

    loop {
        let line_end = match find_crlf(&input[offset..]) {
            Some(rel) => offset + rel,
            None => {
                if input.len() - offset > 18 {
                    // Longest valid size line: 16 hex digits + extension
                    // separator; anything longer without CRLF is corrupt.
                    return Err(ParseError::InvalidChunkSize);
                }
                return Err(ParseError::IncompleteResponse);
            }
        };
        let size_line = &input[offset..line_end];
        // Chunk extensions (";ext=val") are tolerated and ignored.
        let size_part = match size_line.iter().position(|&b| b == b';') {
            Some(p) => &size_line[..p],
            None => size_line,
        };
        let size = parse_hex(size_part)?;
        offset = line_end + 2;

        if size == 0 {
            // Terminal chunk: a bare CRLF ends the body (no trailers).
            if input.len() < offset + 2 {
                return Err(ParseError::IncompleteResponse);
            }
            if &input[offset..offset + 2] != b"\r\n" {
                return Err(ParseError::MalformedChunkedBody);
            }
            return Ok((body, offset + 2));
        }

        if body.len() + size > MAX_BODY_LEN {
            return Err(ParseError::BodyTooLarge);
        }
        if input.len() < offset + size + 2 {
            return Err(ParseError::IncompleteResponse);
        }
        body.extend_from_slice(&input[offset..offset + size]);
        if &input[offset + size..offset + size + 2] != b"\r\n" {
            return Err(ParseError::MalformedChunkedBody);
        }
        offset += size + 2;
    }
}

fn parse_hex(digits: &[u8]) -> Result<usize, ParseError> {
    if digits.is_empty() || digits.len() > 16 {
        return Err(ParseError::InvalidChunkSize);
    }
    let mut value: usize = 0;
    for &b in digits {
        let d = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => return Err(ParseError::InvalidChunkSize),
        };
        value = value
            .checked_mul(16)
            .and_then(|v| v.checked_add(d as usize))
            .ok_or(ParseError::InvalidChunkSize)?;
    }
    Ok(value)
}

fn find_crlf(input: &[u8]) -> Option<usize> {
    input.windows(2).position(|w| w == b"\r\n")
}
