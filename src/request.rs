//! Request parser for the digest protocol.
//!
//! A request is a single line of three space-separated tokens:
//!
//! ```text
//! get <text> <delay_ms>
//! ```
//!
//! Only the ASCII space separates tokens; there is no quoting or escaping,
//! so `<text>` cannot itself contain a space (but may be empty). The text is
//! kept as raw bytes; only the keyword and the delay have to be ASCII.

use std::time::Duration;

/// Maximum number of bytes taken from a single read.
pub const MAX_REQUEST_LEN: usize = 4084;

/// The only command keyword the server understands.
const COMMAND_GET: &[u8] = b"get";

/// A parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Opaque payload to digest.
    pub text: Vec<u8>,
    /// Simulated service time in milliseconds.
    pub delay_ms: u64,
}

impl Request {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Request parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Not exactly three tokens.
    MalformedRequest(usize),
    /// First token is not `get`.
    UnknownCommand(String),
    /// Third token is not a non-negative base-10 integer.
    InvalidDelay(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::MalformedRequest(tokens) => write!(
                f,
                "request must contain just three text strings: get text n (got {})",
                tokens
            ),
            ParseError::UnknownCommand(cmd) => write!(f, "unknown request: {}", cmd),
            ParseError::InvalidDelay(n) => write!(f, "invalid n: {}", n),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parse one raw request.
///
/// A single trailing line ending (`\n` or `\r\n`) is ignored, as is a single
/// trailing space. Everything else is significant.
pub fn parse(raw: &[u8]) -> Result<Request, ParseError> {
    let line = raw
        .strip_suffix(b"\r\n")
        .or_else(|| raw.strip_suffix(b"\n"))
        .unwrap_or(raw);
    let line = line.strip_suffix(b" ").unwrap_or(line);

    let tokens: Vec<&[u8]> = line.split(|&b| b == b' ').collect();
    if tokens.len() != 3 {
        return Err(ParseError::MalformedRequest(tokens.len()));
    }

    if tokens[0] != COMMAND_GET {
        return Err(ParseError::UnknownCommand(lossy(tokens[0])));
    }

    let delay_ms = parse_delay(tokens[2])?;

    Ok(Request {
        text: tokens[1].to_vec(),
        delay_ms,
    })
}

/// Strict base-10 parse: digits only, no sign, no whitespace.
fn parse_delay(token: &[u8]) -> Result<u64, ParseError> {
    if token.is_empty() || !token.iter().all(u8::is_ascii_digit) {
        return Err(ParseError::InvalidDelay(lossy(token)));
    }
    // All ASCII digits, so valid UTF-8; only overflow can fail here.
    std::str::from_utf8(token)
        .ok()
        .and_then(|digits| digits.parse::<u64>().ok())
        .ok_or_else(|| ParseError::InvalidDelay(lossy(token)))
}

fn lossy(token: &[u8]) -> String {
    String::from_utf8_lossy(token).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get() {
        let req = parse(b"get hello 100").unwrap();
        assert_eq!(req.text, b"hello");
        assert_eq!(req.delay_ms, 100);
        assert_eq!(req.delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_parse_zero_delay() {
        let req = parse(b"get abc 0").unwrap();
        assert_eq!(req.delay_ms, 0);
    }

    #[test]
    fn test_parse_strips_line_ending() {
        assert_eq!(parse(b"get hello 5\n").unwrap().delay_ms, 5);
        assert_eq!(parse(b"get hello 5\r\n").unwrap().delay_ms, 5);
        assert_eq!(parse(b"get hello 5 ").unwrap().text, b"hello");
    }

    #[test]
    fn test_parse_empty_text() {
        let req = parse(b"get  7").unwrap();
        assert_eq!(req.text, b"");
        assert_eq!(req.delay_ms, 7);
    }

    #[test]
    fn test_wrong_token_count() {
        assert_eq!(parse(b"get 1"), Err(ParseError::MalformedRequest(2)));
        assert_eq!(parse(b"get a b 1"), Err(ParseError::MalformedRequest(4)));
        assert!(matches!(parse(b""), Err(ParseError::MalformedRequest(_))));
        // Tabs are not separators.
        assert!(matches!(
            parse(b"get\thello\t1"),
            Err(ParseError::MalformedRequest(1))
        ));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            parse(b"put hello 1"),
            Err(ParseError::UnknownCommand("put".to_string()))
        );
        assert!(matches!(
            parse(b"GET hello 1"),
            Err(ParseError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_invalid_delay() {
        for bad in ["abc", "-1", "+5", "5ms", "", " 5", "1.5"] {
            let raw = format!("get hello {bad}");
            match parse(raw.as_bytes()) {
                Err(ParseError::InvalidDelay(_)) | Err(ParseError::MalformedRequest(_)) => {}
                other => panic!("unexpected for {:?}: {:?}", bad, other),
            }
        }
        assert_eq!(
            parse(b"get hello x"),
            Err(ParseError::InvalidDelay("x".to_string()))
        );
    }

    #[test]
    fn test_text_is_opaque_bytes() {
        let req = parse(b"get \xff\xfe 1").unwrap();
        assert_eq!(req.text, b"\xff\xfe");
        assert_eq!(req.delay_ms, 1);

        let req = parse(b"get caf\xe9 0\r\n").unwrap();
        assert_eq!(req.text, b"caf\xe9");
    }

    #[test]
    fn test_non_utf8_command_and_delay() {
        assert!(matches!(
            parse(b"g\xffet hello 1"),
            Err(ParseError::UnknownCommand(_))
        ));
        assert!(matches!(
            parse(b"get hello \xff"),
            Err(ParseError::InvalidDelay(_))
        ));
    }

    #[test]
    fn test_delay_overflow() {
        assert!(matches!(
            parse(b"get hello 99999999999999999999999"),
            Err(ParseError::InvalidDelay(_))
        ));
    }

    #[test]
    fn test_error_display() {
        let e = ParseError::InvalidDelay("zz".to_string());
        assert_eq!(e.to_string(), "invalid n: zz");
    }
}
