//! Template filters for configuration files

use base64::Engine as _;
use minijinja::value::Value;
use minijinja::{Error, ErrorKind};
use sha2::{Digest, Sha256};

/// Filters registered on top of the MiniJinja builtins
pub const AVAILABLE_FILTERS: &[&str] = &[
    "b64encode",
    "b64decode",
    "sha256",
    "quote",
    // builtins commonly used in config files
    "default",
    "join",
    "lower",
    "upper",
    "trim",
    "replace",
    "tojson",
];

fn bytes_of(value: &Value, filter: &str) -> Result<Vec<u8>, Error> {
    if let Some(s) = value.as_str() {
        return Ok(s.as_bytes().to_vec());
    }
    value.as_bytes().map(<[u8]>::to_vec).ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("{} expects a string or bytes, got {}", filter, value.kind()),
        )
    })
}

/// Base64 encode a string or a byte value
///
/// Usage: {{ kube.secret_binary("tls", "", "tls.key") | b64encode }}
pub fn b64encode(value: Value) -> Result<String, Error> {
    let bytes = bytes_of(&value, "b64encode")?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Base64 decode a string
///
/// Usage: {{ encoded | b64decode }}
pub fn b64decode(value: String) -> Result<String, Error> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(value.trim().as_bytes())
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("base64 decode error: {}", e)))?;

    String::from_utf8(decoded)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("UTF-8 decode error: {}", e)))
}

/// Hex-encoded SHA-256 of a string or byte value
///
/// Usage: {{ kube.config_map("app", "", "config") | sha256 }}
pub fn sha256sum(value: Value) -> Result<String, Error> {
    let bytes = bytes_of(&value, "sha256")?;
    Ok(hex::encode(Sha256::digest(bytes)))
}

/// Quote a string with double quotes
///
/// Usage: {{ name | quote }}
#[must_use]
pub fn quote(value: Value) -> String {
    let s = match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    };
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_b64encode_string_and_bytes() {
        assert_eq!(b64encode(Value::from("hello")).unwrap(), "aGVsbG8=");
        assert_eq!(
            b64encode(Value::from_bytes(vec![0xff, 0x00])).unwrap(),
            "/wA="
        );
        assert!(b64encode(Value::from(42)).is_err());
    }

    #[test]
    fn test_b64decode() {
        assert_eq!(b64decode("aGVsbG8=\n".to_string()).unwrap(), "hello");
        assert!(b64decode("!!!".to_string()).is_err());
    }

    #[test]
    fn test_sha256() {
        assert_eq!(
            sha256sum(Value::from("abc")).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote(Value::from("a \"b\"")), r#""a \"b\"""#);
        assert_eq!(quote(Value::from(8080)), "\"8080\"");
    }
}
