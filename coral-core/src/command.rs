//! Canonical command frame and reply types.

/// Command payload representation handed from the protocol facade to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    /// Command name in uppercase canonical form (e.g. `SET`, `BLPOP`).
    pub name: String,
    /// Raw byte arguments preserving wire-level payload.
    pub args: Vec<Vec<u8>>,
}

impl CommandFrame {
    /// Creates a command frame from a command name and argument list.
    #[must_use]
    pub fn new(name: impl Into<String>, args: Vec<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Canonical command reply representation.
///
/// The reply enum is kept wire-neutral; encoding to RESP bytes happens in one place so handler
/// logic never deals with framing.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `+OK` style replies.
    SimpleString(String),
    /// `$<len> ...` style binary-safe payload.
    BulkString(Vec<u8>),
    /// RESP null bulk string (`$-1`).
    Null,
    /// RESP integer reply (`:<n>`).
    Integer(i64),
    /// RESP array reply (`*<n> ...`).
    Array(Vec<Reply>),
    /// RESP null array (`*-1`), used for blocking-command timeouts.
    NullArray,
    /// `-<code> <message>` style error. The message carries its own code prefix
    /// (`ERR ...`, `WRONGTYPE ...`) so one variant covers the whole taxonomy.
    Error(String),
}

impl Reply {
    /// Shorthand for the ubiquitous `+OK`.
    #[must_use]
    pub fn ok() -> Self {
        Self::SimpleString("OK".to_owned())
    }

    /// Encodes the reply into RESP bytes.
    #[must_use]
    pub fn to_resp_bytes(&self) -> Vec<u8> {
        match self {
            Self::SimpleString(value) => {
                let mut output = Vec::with_capacity(value.len() + 3);
                output.push(b'+');
                output.extend_from_slice(value.as_bytes());
                output.extend_from_slice(b"\r\n");
                output
            }
            Self::BulkString(value) => {
                let mut output = format!("${}\r\n", value.len()).into_bytes();
                output.extend_from_slice(value);
                output.extend_from_slice(b"\r\n");
                output
            }
            Self::Null => b"$-1\r\n".to_vec(),
            Self::Integer(value) => format!(":{value}\r\n").into_bytes(),
            Self::Array(items) => {
                let mut output = format!("*{}\r\n", items.len()).into_bytes();
                for item in items {
                    output.extend_from_slice(&item.to_resp_bytes());
                }
                output
            }
            Self::NullArray => b"*-1\r\n".to_vec(),
            Self::Error(message) => {
                let mut output = Vec::with_capacity(message.len() + 3);
                output.push(b'-');
                output.extend_from_slice(message.as_bytes());
                output.extend_from_slice(b"\r\n");
                output
            }
        }
    }
}

/// Formats a sorted-set score the way clients expect: integral scores print without a
/// fractional part.
#[must_use]
pub fn format_score(score: f64) -> String {
    if score.fract() == 0.0 && score.abs() < 1e17 {
        format!("{}", score as i64)
    } else {
        format!("{score}")
    }
}

#[cfg(test)]
mod tests {
    use super::{Reply, format_score};
    use googletest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(Reply::ok(), b"+OK\r\n".to_vec())]
    #[case(Reply::Integer(-7), b":-7\r\n".to_vec())]
    #[case(Reply::Null, b"$-1\r\n".to_vec())]
    #[case(Reply::NullArray, b"*-1\r\n".to_vec())]
    #[case(Reply::Array(vec![]), b"*0\r\n".to_vec())]
    #[case(Reply::Error("ERR boom".to_owned()), b"-ERR boom\r\n".to_vec())]
    fn replies_encode_to_resp(#[case] reply: Reply, #[case] expected: Vec<u8>) {
        assert_that!(&reply.to_resp_bytes(), eq(&expected));
    }

    #[rstest]
    fn bulk_string_round_trips_binary_payloads() {
        let reply = Reply::BulkString(b"a\r\n\x00b".to_vec());
        assert_that!(&reply.to_resp_bytes(), eq(&b"$5\r\na\r\n\x00b\r\n".to_vec()));
    }

    #[rstest]
    fn nested_array_encodes_each_element() {
        let reply = Reply::Array(vec![
            Reply::BulkString(b"key".to_vec()),
            Reply::BulkString(b"value".to_vec()),
        ]);
        assert_that!(
            &reply.to_resp_bytes(),
            eq(&b"*2\r\n$3\r\nkey\r\n$5\r\nvalue\r\n".to_vec())
        );
    }

    #[rstest]
    #[case(0.0, "0")]
    #[case(3.0, "3")]
    #[case(-2.0, "-2")]
    #[case(1.5, "1.5")]
    fn scores_format_like_redis(#[case] score: f64, #[case] expected: &str) {
        assert_that!(format_score(score), eq(expected));
    }
}
