//! Line framing
//!
//! WMP frames are ASCII lines. Gateways terminate with `\r\n`, controllers
//! often send a bare `\r`; any of `\r`, `\n` or `\r\n` ends a frame. Blank
//! lines carry no frame and are skipped.
//!
//! ```text
//! SET,1:MODE,COOL\r
//! ACK\r\n
//! CHN,1:MODE,COOL\r\n
//! ```

use crate::{Error, Result, MAX_LINE_LENGTH};
use bytes::{Buf, Bytes, BytesMut};

/// Location of the next line in a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineBoundary {
    /// A complete line
    Complete {
        /// Blank terminators before the line
        skip: usize,
        /// Length of the line, terminator excluded
        len: usize,
        /// Bytes occupied by skip, line and terminator
        consumed: usize,
    },
    /// No terminator yet
    Incomplete,
    /// No terminator within the maximum line length
    Overflow { length: usize },
}

fn is_terminator(byte: u8) -> bool {
    byte == b'\r' || byte == b'\n'
}

/// Locate the next line without consuming anything
pub fn find_line(buf: &[u8]) -> LineBoundary {
    let skip = buf.iter().take_while(|b| is_terminator(**b)).count();
    let rest = &buf[skip..];

    match rest.iter().position(|b| is_terminator(*b)) {
        Some(len) if len > MAX_LINE_LENGTH => LineBoundary::Overflow { length: len },
        Some(len) => {
            let terminator = if rest[len] == b'\r' && rest.get(len + 1) == Some(&b'\n') {
                2
            } else {
                1
            };
            LineBoundary::Complete {
                skip,
                len,
                consumed: skip + len + terminator,
            }
        }
        None if rest.len() > MAX_LINE_LENGTH => LineBoundary::Overflow { length: rest.len() },
        None => LineBoundary::Incomplete,
    }
}

/// Split the next complete line off a receive buffer
///
/// Returns `Ok(None)` when more bytes are needed; blank terminators left in
/// the buffer are discarded. An overflow leaves the buffer untouched.
pub fn split_line(buf: &mut BytesMut) -> Result<Option<Bytes>> {
    match find_line(buf) {
        LineBoundary::Complete {
            skip,
            len,
            consumed,
        } => {
            buf.advance(skip);
            let line = buf.split_to(len).freeze();
            buf.advance(consumed - skip - len);
            Ok(Some(line))
        }
        LineBoundary::Incomplete => {
            if buf.iter().all(|b| is_terminator(*b)) {
                buf.clear();
            }
            Ok(None)
        }
        LineBoundary::Overflow { length } => Err(Error::LineTooLong {
            length,
            max: MAX_LINE_LENGTH,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_line_terminators() {
        assert_eq!(
            find_line(b"ACK\r\n"),
            LineBoundary::Complete {
                skip: 0,
                len: 3,
                consumed: 5
            }
        );
        assert_eq!(
            find_line(b"ID\r"),
            LineBoundary::Complete {
                skip: 0,
                len: 2,
                consumed: 3
            }
        );
        assert_eq!(
            find_line(b"\r\nERR\nACK"),
            LineBoundary::Complete {
                skip: 2,
                len: 3,
                consumed: 6
            }
        );
        assert_eq!(find_line(b"SET:MO"), LineBoundary::Incomplete);
    }

    #[test]
    fn test_split_line_sequence() {
        let mut buf = BytesMut::from(&b"ACK\r\nCHN,MODE,COOL\r\nLIM"[..]);

        assert_eq!(split_line(&mut buf).unwrap().unwrap().as_ref(), b"ACK");
        assert_eq!(
            split_line(&mut buf).unwrap().unwrap().as_ref(),
            b"CHN,MODE,COOL"
        );
        assert!(split_line(&mut buf).unwrap().is_none());
        assert_eq!(buf.as_ref(), b"LIM");
    }

    #[test]
    fn test_split_line_discards_blank_tail() {
        let mut buf = BytesMut::from(&b"\r\n\r\n"[..]);
        assert!(split_line(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_overflow() {
        let long = vec![b'A'; MAX_LINE_LENGTH + 1];
        let mut buf = BytesMut::from(&long[..]);
        assert!(matches!(
            split_line(&mut buf),
            Err(Error::LineTooLong { .. })
        ));
        assert_eq!(buf.len(), MAX_LINE_LENGTH + 1);
    }
}
