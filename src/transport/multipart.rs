//! Incremental parsing for `multipart/x-mixed-replace` MJPEG bodies.
//!
//! The parsers here never touch I/O. Callers append bytes to a `BytesMut`
//! and pull complete items out; anything incomplete stays buffered.

use crate::error::TransportError;
use bytes::{Buf, Bytes, BytesMut};

/// Upper bound for a part header block or delimiter line
const MAX_HEADER_BYTES: usize = 16 * 1024;
/// Upper bound for a single buffered JPEG part
pub const MAX_PART_BYTES: usize = 16 * 1024 * 1024;

/// The multipart delimiter line (`--boundary`) announced by a Content-Type
pub fn multipart_delimiter(content_type: &str) -> Result<String, TransportError> {
    let not_multipart = || TransportError::NotMultipart {
        content_type: content_type.to_string(),
    };
    if !content_type.to_ascii_lowercase().starts_with("multipart/") {
        return Err(not_multipart());
    }

    let boundary = content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"'))
        .filter(|value| !value.is_empty())
        .ok_or_else(not_multipart)?;

    // Some cameras announce the boundary with its leading dashes
    if boundary.starts_with("--") {
        Ok(boundary.to_string())
    } else {
        Ok(format!("--{}", boundary))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartState {
    SeekBoundary,
    Headers,
    Body(Option<usize>),
    Finished,
}

/// Splits a multipart body into its parts
#[derive(Debug)]
pub struct MultipartParser {
    delimiter: Vec<u8>,
    /// `\r\n--boundary`, used when a part carries no Content-Length
    terminator: Vec<u8>,
    state: PartState,
    /// Bytes of the current unsized part already searched for the terminator
    scanned: usize,
}

impl MultipartParser {
    /// `delimiter` is the full delimiter line, leading dashes included
    pub fn new(delimiter: &str) -> Self {
        let delimiter = delimiter.as_bytes().to_vec();
        let mut terminator = b"\r\n".to_vec();
        terminator.extend_from_slice(&delimiter);
        Self {
            delimiter,
            terminator,
            state: PartState::SeekBoundary,
            scanned: 0,
        }
    }

    /// True once the closing `--boundary--` line was seen
    pub fn is_finished(&self) -> bool {
        self.state == PartState::Finished
    }

    /// Pull the next complete part body out of `body`
    pub fn next_part(&mut self, body: &mut BytesMut) -> Result<Option<Bytes>, TransportError> {
        loop {
            match self.state {
                PartState::SeekBoundary => {
                    let Some(start) = find(body, &self.delimiter) else {
                        // Keep a tail that could be the start of a split delimiter
                        let keep = self.delimiter.len().saturating_sub(1);
                        if body.len() > keep {
                            body.advance(body.len() - keep);
                        }
                        return Ok(None);
                    };
                    let after = start + self.delimiter.len();
                    if body.len() < after + 2 {
                        return Ok(None);
                    }
                    if &body[after..after + 2] == b"--" {
                        body.advance(after + 2);
                        self.state = PartState::Finished;
                        continue;
                    }
                    let Some(line_end) = find(&body[after..], b"\r\n") else {
                        if body.len() - after > MAX_HEADER_BYTES {
                            return Err(malformed("delimiter line too long"));
                        }
                        return Ok(None);
                    };
                    body.advance(after + line_end + 2);
                    self.state = PartState::Headers;
                }
                PartState::Headers => {
                    // A part without headers starts its body right away
                    if body.starts_with(b"\r\n") {
                        body.advance(2);
                        self.scanned = 0;
                        self.state = PartState::Body(None);
                        continue;
                    }
                    let Some(end) = find(body, b"\r\n\r\n") else {
                        if body.len() > MAX_HEADER_BYTES {
                            return Err(malformed("part headers too large"));
                        }
                        return Ok(None);
                    };
                    let block = body.split_to(end + 4);
                    let text = String::from_utf8_lossy(&block[..end]);
                    let headers = parse_header_lines(text.split("\r\n"));
                    let length = match header_value(&headers, "content-length") {
                        Some(value) => Some(value.parse::<usize>().map_err(|_| {
                            malformed(format!("bad part Content-Length '{}'", value))
                        })?),
                        None => None,
                    };
                    if length.is_some_and(|len| len > MAX_PART_BYTES) {
                        return Err(malformed("part exceeds size limit"));
                    }
                    self.scanned = 0;
                    self.state = PartState::Body(length);
                }
                PartState::Body(Some(length)) => {
                    if body.len() < length {
                        return Ok(None);
                    }
                    let part = body.split_to(length).freeze();
                    self.state = PartState::SeekBoundary;
                    return Ok(Some(part));
                }
                PartState::Body(None) => {
                    let from = self.scanned.min(body.len());
                    let Some(offset) = find(&body[from..], &self.terminator) else {
                        if body.len() > MAX_PART_BYTES {
                            return Err(malformed("part exceeds size limit"));
                        }
                        // The tail may hold the start of a split terminator
                        self.scanned = body.len().saturating_sub(self.terminator.len() - 1);
                        return Ok(None);
                    };
                    let end = from + offset;
                    self.scanned = 0;
                    let part = body.split_to(end).freeze();
                    // Leave the delimiter in place for SeekBoundary
                    body.advance(2);
                    self.state = PartState::SeekBoundary;
                    return Ok(Some(part));
                }
                PartState::Finished => return Ok(None),
            }
        }
    }
}

fn parse_header_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<(String, String)> {
    lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect()
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn malformed(details: impl Into<String>) -> TransportError {
    TransportError::Malformed {
        details: details.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JPEG_A: &[u8] = &[0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9];
    const JPEG_B: &[u8] = &[0xFF, 0xD8, 0x0D, 0x0A, 0x2D, 0x2D, 0xFF, 0xD9];

    fn part_with_length(jpeg: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "--FRAME\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            jpeg.len()
        )
        .into_bytes();
        out.extend_from_slice(jpeg);
        out.extend_from_slice(b"\r\n");
        out
    }

    #[test]
    fn test_boundary_variants() {
        assert_eq!(
            multipart_delimiter("multipart/x-mixed-replace; boundary=FRAME").unwrap(),
            "--FRAME"
        );
        assert_eq!(
            multipart_delimiter("multipart/x-mixed-replace;boundary=\"frame\"").unwrap(),
            "--frame"
        );
        assert_eq!(
            multipart_delimiter("Multipart/X-Mixed-Replace; BOUNDARY=--myboundary").unwrap(),
            "--myboundary"
        );
        assert!(matches!(
            multipart_delimiter("text/html"),
            Err(TransportError::NotMultipart { .. })
        ));
        assert!(multipart_delimiter("multipart/x-mixed-replace").is_err());
        assert!(multipart_delimiter("").is_err());
    }

    #[test]
    fn test_parts_with_content_length() {
        let mut parser = MultipartParser::new("--FRAME");
        let mut body = BytesMut::new();
        body.extend_from_slice(&part_with_length(JPEG_A));
        body.extend_from_slice(&part_with_length(JPEG_B));

        assert_eq!(parser.next_part(&mut body).unwrap().as_deref(), Some(JPEG_A));
        assert_eq!(parser.next_part(&mut body).unwrap().as_deref(), Some(JPEG_B));
        assert_eq!(parser.next_part(&mut body).unwrap(), None);
    }

    #[test]
    fn test_parts_without_content_length() {
        let mut parser = MultipartParser::new("--frame");
        let mut body = BytesMut::new();
        for jpeg in [JPEG_A, JPEG_B] {
            body.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
            body.extend_from_slice(jpeg);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(b"--frame--\r\n");

        assert_eq!(parser.next_part(&mut body).unwrap().as_deref(), Some(JPEG_A));
        assert_eq!(parser.next_part(&mut body).unwrap().as_deref(), Some(JPEG_B));
        assert_eq!(parser.next_part(&mut body).unwrap(), None);
        assert!(parser.is_finished());
    }

    #[test]
    fn test_parts_split_across_reads() {
        let mut parser = MultipartParser::new("--FRAME");
        let stream = [part_with_length(JPEG_A), part_with_length(JPEG_B)].concat();
        let mut body = BytesMut::new();
        let mut parts = Vec::new();

        for byte in stream {
            body.extend_from_slice(&[byte]);
            while let Some(part) = parser.next_part(&mut body).unwrap() {
                parts.push(part);
            }
        }

        assert_eq!(parts, vec![Bytes::from_static(JPEG_A), Bytes::from_static(JPEG_B)]);
    }

    #[test]
    fn test_bad_content_length() {
        let mut parser = MultipartParser::new("--FRAME");
        let mut body = BytesMut::from(&b"--FRAME\r\nContent-Length: lots\r\n\r\n\xFF\xD8"[..]);

        assert!(matches!(
            parser.next_part(&mut body),
            Err(TransportError::Malformed { .. })
        ));
    }

    #[test]
    fn test_unsized_part_scans_each_byte_once() {
        let mut parser = MultipartParser::new("--frame");
        let mut body = BytesMut::from(&b"--frame\r\n\r\n"[..]);
        assert_eq!(parser.next_part(&mut body).unwrap(), None);

        let jpeg: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        for piece in jpeg.chunks(100) {
            body.extend_from_slice(piece);
            assert_eq!(parser.next_part(&mut body).unwrap(), None);
            // Only the possible start of a split terminator is searched again
            assert_eq!(parser.scanned, body.len() - (parser.terminator.len() - 1));
        }

        body.extend_from_slice(b"\r\n--fr");
        assert_eq!(parser.next_part(&mut body).unwrap(), None);
        body.extend_from_slice(b"ame--\r\n");

        assert_eq!(parser.next_part(&mut body).unwrap().as_deref(), Some(&jpeg[..]));
        assert_eq!(parser.scanned, 0);
        assert_eq!(parser.next_part(&mut body).unwrap(), None);
        assert!(parser.is_finished());
    }
}
