//! Incremental decoder for `Transfer-Encoding: chunked` bodies
//!
//! Bytes are pushed in whatever pieces the connection yields. The decoded
//! payload is capped; anything past the cap is read and discarded so the
//! framing stays in sync, and the decoder reports `truncated`.

use crate::http::parser::ParseError;

/// Longest accepted chunk-size line, extensions included.
const MAX_SIZE_LINE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    Data { remaining: usize },
    DataEnd,
    Trailer,
    Done,
}

#[derive(Debug)]
pub struct ChunkedDecoder {
    state: State,
    line: Vec<u8>,
    decoded: Vec<u8>,
    max: usize,
    truncated: bool,
}

impl ChunkedDecoder {
    pub fn new(max: usize) -> Self {
        Self {
            state: State::Size,
            line: Vec::new(),
            decoded: Vec::new(),
            max,
            truncated: false,
        }
    }

    /// Feed raw bytes; returns how many were consumed.
    ///
    /// Once the terminating chunk and trailer have been read the decoder stops
    /// consuming, so anything after the body is left to the caller.
    pub fn feed(&mut self, input: &[u8]) -> Result<usize, ParseError> {
        let mut pos = 0;

        while pos < input.len() {
            match self.state {
                State::Done => break,

                State::Size => {
                    let Some(line) = self.take_line(input, &mut pos)? else {
                        continue;
                    };
                    let size = parse_chunk_size(&line)?;
                    self.state = if size == 0 {
                        State::Trailer
                    } else {
                        State::Data { remaining: size }
                    };
                }

                State::Data { remaining } => {
                    let n = remaining.min(input.len() - pos);
                    self.append(&input[pos..pos + n]);
                    pos += n;

                    self.state = if n == remaining {
                        State::DataEnd
                    } else {
                        State::Data { remaining: remaining - n }
                    };
                }

                State::DataEnd => {
                    let Some(line) = self.take_line(input, &mut pos)? else {
                        continue;
                    };
                    if !line.is_empty() {
                        return Err(ParseError::InvalidChunk("missing CRLF after chunk data"));
                    }
                    self.state = State::Size;
                }

                State::Trailer => {
                    let Some(line) = self.take_line(input, &mut pos)? else {
                        continue;
                    };
                    if line.is_empty() {
                        self.state = State::Done;
                    }
                }
            }
        }

        Ok(pos)
    }

    pub fn is_complete(&self) -> bool {
        self.state == State::Done
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn decoded(&self) -> &[u8] {
        &self.decoded
    }

    pub fn into_decoded(self) -> Vec<u8> {
        self.decoded
    }

    fn append(&mut self, data: &[u8]) {
        let room = self.max.saturating_sub(self.decoded.len());
        if data.len() > room {
            self.truncated = true;
        }
        self.decoded.extend_from_slice(&data[..data.len().min(room)]);
    }

    /// Accumulate one CRLF-terminated line; `None` until it is complete.
    fn take_line(&mut self, input: &[u8], pos: &mut usize) -> Result<Option<Vec<u8>>, ParseError> {
        while *pos < input.len() {
            let b = input[*pos];
            *pos += 1;

            if b == b'\n' {
                if self.line.last() == Some(&b'\r') {
                    self.line.pop();
                }
                return Ok(Some(std::mem::take(&mut self.line)));
            }

            self.line.push(b);
            if self.line.len() > MAX_SIZE_LINE {
                return Err(ParseError::InvalidChunk("chunk line too long"));
            }
        }
        Ok(None)
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    let text = std::str::from_utf8(line).map_err(|_| ParseError::InvalidChunk("non-ASCII chunk size"))?;
    let hex = text.split(';').next().unwrap_or_default().trim();

    if hex.is_empty() {
        return Err(ParseError::InvalidChunk("empty chunk size"));
    }

    usize::from_str_radix(hex, 16).map_err(|_| ParseError::InvalidChunk("invalid chunk size"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_in_one_piece() {
        let mut d = ChunkedDecoder::new(1024);
        let input = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        assert_eq!(d.feed(input).unwrap(), input.len());
        assert!(d.is_complete());
        assert_eq!(d.decoded(), b"Wikipedia");
    }

    #[test]
    fn stops_after_terminator() {
        let mut d = ChunkedDecoder::new(1024);
        let input = b"3\r\nabc\r\n0\r\n\r\nGET /next";
        let consumed = d.feed(input).unwrap();
        assert_eq!(&input[consumed..], b"GET /next");
    }

    #[test]
    fn accepts_extensions_and_trailers() {
        let mut d = ChunkedDecoder::new(1024);
        d.feed(b"3;name=value\r\nabc\r\n0\r\nX-Trailer: 1\r\n\r\n").unwrap();
        assert!(d.is_complete());
        assert_eq!(d.decoded(), b"abc");
    }

    #[test]
    fn rejects_bad_size() {
        let mut d = ChunkedDecoder::new(1024);
        assert!(matches!(d.feed(b"zz\r\n"), Err(ParseError::InvalidChunk(_))));
    }

    #[test]
    fn rejects_missing_data_terminator() {
        let mut d = ChunkedDecoder::new(1024);
        assert!(d.feed(b"3\r\nabcX\r\n").is_err());
    }
}
