//! Static-table HPACK (RFC 7541).
//!
//! Only the 61-entry static table is implemented: dynamic-table size
//! updates are parsed and ignored, and incremental-indexing literals are
//! decoded without being stored. Huffman-coded strings are surfaced as
//! their raw bytes — a documented limitation of this codec.

use crate::error::HpackError;

/// RFC 7541 Appendix A. One-based indexing on the wire.
pub const STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Decode a complete header block into (name, value) pairs.
pub fn decode_block(block: &[u8]) -> Result<Vec<(String, String)>, HpackError> {
    let mut headers = Vec::new();
    let mut pos = 0;

    while pos < block.len() {
        let first = block[pos];

        if first & 0x80 != 0 {
            // Indexed header field.
            let (index, consumed) = decode_integer(&block[pos..], 7)?;
            pos += consumed;
            let (name, value) = static_entry(index)?;
            headers.push((name.to_string(), value.to_string()));
        } else if first & 0xC0 == 0x40 {
            // Literal with incremental indexing (no table to insert into).
            pos += decode_literal(&block[pos..], 6, &mut headers)?;
        } else if first & 0xE0 == 0x20 {
            // Dynamic table size update: parsed and ignored.
            let (_, consumed) = decode_integer(&block[pos..], 5)?;
            pos += consumed;
        } else {
            // Literal without indexing (0x00) or never indexed (0x10).
            pos += decode_literal(&block[pos..], 4, &mut headers)?;
        }
    }

    Ok(headers)
}

/// Decode one literal header field representation; returns bytes consumed.
fn decode_literal(
    buf: &[u8],
    prefix_bits: u8,
    headers: &mut Vec<(String, String)>,
) -> Result<usize, HpackError> {
    let (name_index, mut pos) = decode_integer(buf, prefix_bits)?;
    let name = if name_index == 0 {
        let (bytes, consumed) = decode_string(&buf[pos..])?;
        pos += consumed;
        String::from_utf8_lossy(&bytes).into_owned()
    } else {
        static_entry(name_index)?.0.to_string()
    };
    let (value_bytes, consumed) = decode_string(&buf[pos..])?;
    pos += consumed;
    let value = String::from_utf8_lossy(&value_bytes).into_owned();
    headers.push((name, value));
    Ok(pos)
}

fn static_entry(index: u64) -> Result<(&'static str, &'static str), HpackError> {
    if index == 0 {
        return Err(HpackError::InvalidEncoding);
    }
    // No dynamic table: anything past the static table is invalid.
    STATIC_TABLE
        .get(index as usize - 1)
        .copied()
        .ok_or(HpackError::InvalidIndex)
}

/// Decode an N-bit-prefix integer; returns (value, bytes consumed).
fn decode_integer(buf: &[u8], prefix_bits: u8) -> Result<(u64, usize), HpackError> {
    if buf.is_empty() {
        return Err(HpackError::BufferTooSmall);
    }
    let mask = (1u64 << prefix_bits) - 1;
    let mut value = buf[0] as u64 & mask;
    if value < mask {
        return Ok((value, 1));
    }
    let mut shift = 0u32;
    for (i, &b) in buf[1..].iter().enumerate() {
        // 10 continuation bytes would exceed u64; the encoding is corrupt.
        if shift > 63 {
            return Err(HpackError::InvalidEncoding);
        }
        value = value
            .checked_add(((b & 0x7F) as u64) << shift)
            .ok_or(HpackError::InvalidEncoding)?;
        if b & 0x80 == 0 {
            return Ok((value, i + 2));
        }
        shift += 7;
    }
    Err(HpackError::BufferTooSmall)
}

/// Decode a length-prefixed string; returns (bytes, consumed).
///
/// Huffman-coded strings (H bit set) are returned as their raw coded
/// bytes; no Huffman decoding is performed.
fn decode_string(buf: &[u8]) -> Result<(Vec<u8>, usize), HpackError> {
    if buf.is_empty() {
        return Err(HpackError::BufferTooSmall);
    }
    let (length, mut pos) = decode_integer(buf, 7)?;
    let length = length as usize;
    if buf.len() < pos + length {
        return Err(HpackError::BufferTooSmall);
    }
    let bytes = buf[pos..pos + length].to_vec();
    pos += length;
    Ok((bytes, pos))
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Encode a header list.
///
/// Exact static-table matches use the indexed representation; a
/// name-only match uses literal-without-indexing with the indexed name;
/// everything else is fully literal. Strings are never Huffman-coded.
pub fn encode_block(headers: &[(&str, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    for &(name, value) in headers {
        match static_lookup(name, value) {
            StaticMatch::Full(index) => {
                encode_integer(&mut out, index, 7, 0x80);
            }
            StaticMatch::Name(index) => {
                encode_integer(&mut out, index, 4, 0x00);
                encode_string(&mut out, value.as_bytes());
            }
            StaticMatch::None => {
                out.push(0x00);
                encode_string(&mut out, name.as_bytes());
                encode_string(&mut out, value.as_bytes());
            }
        }
    }
    out
}

enum StaticMatch {
    Full(u64),
    Name(u64),
    None,
}

fn static_lookup(name: &str, value: &str) -> StaticMatch {
    let mut name_index = None;
    for (i, &(n, v)) in STATIC_TABLE.iter().enumerate() {
        if n == name {
            if v == value {
                return StaticMatch::Full(i as u64 + 1);
            }
            name_index.get_or_insert(i as u64 + 1);
        }
    }
    match name_index {
        Some(index) => StaticMatch::Name(index),
        None => StaticMatch::None,
    }
}

fn encode_integer(out: &mut Vec<u8>, mut value: u64, prefix_bits: u8, first_byte: u8) {
    let mask = (1u64 << prefix_bits) - 1;
    if value < mask {
        out.push(first_byte | value as u8);
        return;
    }
    out.push(first_byte | mask as u8);
    value -= mask;
    while value >= 0x80 {
        out.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn encode_string(out: &mut Vec<u8>, bytes: &[u8]) {
    encode_integer(out, bytes.len() as u64, 7, 0x00);
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_table_has_61_entries() {
        assert_eq!(STATIC_TABLE.len(), 61);
        assert_eq!(STATIC_TABLE[0], (":authority", ""));
        assert_eq!(STATIC_TABLE[1], (":method", "GET"));
        assert_eq!(STATIC_TABLE[60], ("www-authenticate", ""));
    }

    #[test]
    fn indexed_field_decodes() {
        // 0x82 = indexed, entry 2 = :method GET
        let headers = decode_block(&[0x82]).unwrap();
        assert_eq!(headers, vec![(":method".to_string(), "GET".to_string())]);
    }

    #[test]
    fn every_static_entry_round_trips_indexed() {
        for &(name, value) in STATIC_TABLE.iter() {
            let encoded = encode_block(&[(name, value)]);
            // Exact matches use the single-byte (or prefix-extended)
            // indexed form.
            assert_eq!(encoded.len(), 1, "entry ({name}, {value})");
            let decoded = decode_block(&encoded).unwrap();
            assert_eq!(decoded, vec![(name.to_string(), value.to_string())]);
        }
    }

    #[test]
    fn literal_with_indexed_name_round_trips() {
        // content-type is in the table by name only.
        let encoded = encode_block(&[("content-type", "application/json")]);
        let decoded = decode_block(&encoded).unwrap();
        assert_eq!(
            decoded,
            vec![("content-type".to_string(), "application/json".to_string())]
        );
    }

    #[test]
    fn fully_literal_header_round_trips() {
        let encoded = encode_block(&[("x-request-id", "abc-123")]);
        let decoded = decode_block(&encoded).unwrap();
        assert_eq!(
            decoded,
            vec![("x-request-id".to_string(), "abc-123".to_string())]
        );
    }

    #[test]
    fn multiple_headers_preserve_order() {
        let input = [
            (":method", "GET"),
            (":scheme", "http"),
            (":authority", "example.test"),
            (":path", "/search"),
            ("user-agent", "z6"),
        ];
        let decoded = decode_block(&encode_block(&input)).unwrap();
        let expected: Vec<(String, String)> = input
            .iter()
            .map(|&(n, v)| (n.to_string(), v.to_string()))
            .collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn literal_with_incremental_indexing_decodes() {
        // 0x41 = literal w/ incremental indexing, name index 1 (:authority)
        let mut block = vec![0x41];
        block.push(4);
        block.extend_from_slice(b"host");
        let decoded = decode_block(&block).unwrap();
        assert_eq!(decoded, vec![(":authority".to_string(), "host".to_string())]);
    }

    #[test]
    fn never_indexed_literal_decodes() {
        // 0x10 = never indexed, literal name
        let mut block = vec![0x10];
        block.push(6);
        block.extend_from_slice(b"secret");
        block.push(1);
        block.extend_from_slice(b"x");
        let decoded = decode_block(&block).unwrap();
        assert_eq!(decoded, vec![("secret".to_string(), "x".to_string())]);
    }

    #[test]
    fn dynamic_table_size_update_ignored() {
        // 0x3F 0xE1 0x1F = size update (5-bit prefix, extended), then
        // an indexed :method GET.
        let decoded = decode_block(&[0x3F, 0xE1, 0x1F, 0x82]).unwrap();
        assert_eq!(decoded, vec![(":method".to_string(), "GET".to_string())]);
    }

    #[test]
    fn huffman_string_returned_raw() {
        // Literal, literal name, Huffman bit set on the value.
        let mut block = vec![0x00];
        block.push(3);
        block.extend_from_slice(b"x-h");
        block.push(0x82); // H=1, length 2
        block.extend_from_slice(&[0xAA, 0xBB]);
        let decoded = decode_block(&block).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].0, "x-h");
        // Raw coded bytes, lossily stringified — not Huffman-decoded.
        assert_eq!(decoded[0].1.as_bytes().len(), 2);
    }

    #[test]
    fn index_beyond_static_table_rejected() {
        // Indexed field 62: first byte 0xBE.
        assert_eq!(decode_block(&[0xBE]).unwrap_err(), HpackError::InvalidIndex);
    }

    #[test]
    fn index_zero_rejected() {
        assert_eq!(
            decode_block(&[0x80]).unwrap_err(),
            HpackError::InvalidEncoding
        );
    }

    #[test]
    fn truncated_string_rejected() {
        let mut block = vec![0x00];
        block.push(10);
        block.extend_from_slice(b"short");
        assert_eq!(
            decode_block(&block).unwrap_err(),
            HpackError::BufferTooSmall
        );
    }

    #[test]
    fn truncated_integer_rejected() {
        // 7-bit prefix saturated, continuation never terminates.
        assert_eq!(
            decode_block(&[0xFF, 0x80, 0x80]).unwrap_err(),
            HpackError::BufferTooSmall
        );
    }

    #[test]
    fn runaway_integer_rejected() {
        let mut block = vec![0xFF];
        block.extend_from_slice(&[0xFF; 11]);
        assert_eq!(
            decode_block(&block).unwrap_err(),
            HpackError::InvalidEncoding
        );
    }

    #[test]
    fn integer_prefix_boundary_round_trips() {
        // Values around the 7-bit prefix boundary.
        for value in [0u64, 1, 126, 127, 128, 255, 16_384] {
            let mut out = Vec::new();
            encode_integer(&mut out, value, 7, 0x00);
            let (decoded, consumed) = decode_integer(&out, 7).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, out.len());
        }
    }

    #[test]
    fn empty_block_decodes_to_no_headers() {
        assert!(decode_block(&[]).unwrap().is_empty());
    }
}
