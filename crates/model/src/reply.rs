use bytes::Bytes;
use serde::Serialize;
use std::fmt::{self, Write};

/// Reply is a client-facing response value, as written to a response sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Reply {
    Ok,
    Simple(String),
    Error(String),
    Integer(i64),
    Double(f64),
    Bulk(Bytes),
    Array(Vec<Reply>),
    Null,
}

impl Reply {
    pub fn simple(s: impl Into<String>) -> Self {
        Reply::Simple(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        Reply::Error(s.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Encode as canonical JSON bytes. Equal Replies have identical encodings.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Reply always serializes")
    }

    fn render(&self, out: &mut Vec<String>) {
        match self {
            Reply::Ok => out.push("OK".to_string()),
            Reply::Simple(s) => out.push(s.clone()),
            Reply::Error(s) => out.push(format!("(error) {s}")),
            Reply::Integer(i) => out.push(format!("(integer) {i}")),
            Reply::Double(d) => out.push(format!("(double) {d}")),
            Reply::Bulk(b) => out.push(quote(b)),
            Reply::Null => out.push("(nil)".to_string()),
            Reply::Array(items) if items.is_empty() => out.push("(empty array)".to_string()),
            Reply::Array(items) => {
                let width = format!("{}) ", items.len()).len();

                for (index, item) in items.iter().enumerate() {
                    let mut lines = Vec::new();
                    item.render(&mut lines);

                    for (n, line) in lines.into_iter().enumerate() {
                        if n == 0 {
                            out.push(format!("{:>w$}{line}", format!("{}) ", index + 1), w = width));
                        } else {
                            out.push(format!("{:w$}{line}", "", w = width));
                        }
                    }
                }
            }
        }
    }
}

// Quote bulk bytes the way redis-cli does, escaping non-printable bytes.
fn quote(b: &[u8]) -> String {
    let mut s = String::with_capacity(b.len() + 2);
    s.push('"');
    for &c in b {
        match c {
            b'"' => s.push_str("\\\""),
            b'\\' => s.push_str("\\\\"),
            b'\n' => s.push_str("\\n"),
            b'\r' => s.push_str("\\r"),
            b'\t' => s.push_str("\\t"),
            0x20..=0x7e => s.push(c as char),
            _ => {
                let _ = write!(s, "\\x{c:02x}");
            }
        }
    }
    s.push('"');
    s
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = Vec::new();
        self.render(&mut lines);
        f.write_str(&lines.join("\n"))
    }
}

impl From<&str> for Reply {
    fn from(value: &str) -> Self {
        Reply::Bulk(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for Reply {
    fn from(value: String) -> Self {
        Reply::Bulk(Bytes::from(value.into_bytes()))
    }
}

impl From<i64> for Reply {
    fn from(value: i64) -> Self {
        Reply::Integer(value)
    }
}

impl From<Vec<Reply>> for Reply {
    fn from(value: Vec<Reply>) -> Self {
        Reply::Array(value)
    }
}

#[cfg(test)]
mod test {
    use super::Reply;

    #[test]
    fn test_rendering() {
        let reply = Reply::Array(vec![
            Reply::Ok,
            Reply::Array(vec![]),
            Reply::Null,
            Reply::error("no such execution"),
            Reply::from("tab\there \"quoted\""),
            Reply::Array(vec![Reply::Integer(1), Reply::Array(vec![Reply::simple("done")])]),
            Reply::from("6"),
            Reply::from("7"),
            Reply::from("8"),
            Reply::from("9"),
            Reply::from("10"),
        ]);

        insta::assert_snapshot!(reply, @r###"
         1) OK
         2) (empty array)
         3) (nil)
         4) (error) no such execution
         5) "tab\there \"quoted\""
         6) 1) (integer) 1
            2) 1) done
         7) "6"
         8) "7"
         9) "8"
        10) "9"
        11) "10"
        "###);
    }

    #[test]
    fn test_byte_encoding_is_stable() {
        let a = Reply::Array(vec![Reply::from("x"), Reply::Double(0.25)]);
        let b = a.clone();

        assert_eq!(a.to_bytes(), b.to_bytes());
        assert_eq!(
            String::from_utf8(a.to_bytes()).unwrap(),
            r#"{"array":[{"bulk":[120]},{"double":0.25}]}"#
        );
    }
}
