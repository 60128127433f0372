//! Properties text format
//!
//! ```text
//! # comment
//! [app]
//! id=com.example.notes
//! ```
//!
//! Keys below a `[section]` header are stored as `[section]key`. Keys before
//! the first header are stored as written.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::{ManifestError, ManifestResult};

/// Parse properties text into a flat map
///
/// # Errors
/// - `ManifestError::InvalidField` naming the line for a line that is neither
///   a comment, a section header nor a `key=value` pair
pub fn parse_properties(text: &str) -> ManifestResult<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    let mut section = String::new();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            section = format!("[{}]", name.trim());
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| {
            ManifestError::invalid(&format!("line {}", index + 1), "expected key=value")
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(ManifestError::invalid(&format!("line {}", index + 1), "empty key"));
        }

        map.insert(format!("{section}{key}"), value.trim().to_string());
    }

    Ok(map)
}

/// Read and parse a properties file
pub fn load_properties(path: &Path) -> ManifestResult<BTreeMap<String, String>> {
    let text = fs::read_to_string(path)?;
    parse_properties(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_prefix_keys() {
        let map = parse_properties(
            "# descriptor\n\
             [manifest]\n\
             version=0.1\n\
             \n\
             [app]\n\
             id = com.example.notes\n\
             name=Notes=Pad\n",
        )
        .unwrap();

        assert_eq!(map.get("[manifest]version").map(String::as_str), Some("0.1"));
        assert_eq!(map.get("[app]id").map(String::as_str), Some("com.example.notes"));
        assert_eq!(map.get("[app]name").map(String::as_str), Some("Notes=Pad"));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_keys_before_any_section() {
        let map = parse_properties("ssid=home\n").unwrap();
        assert_eq!(map.get("ssid").map(String::as_str), Some("home"));
    }

    #[test]
    fn test_malformed_line() {
        let err = parse_properties("[app]\nid\n").unwrap_err();
        assert_eq!(
            err,
            ManifestError::InvalidField {
                field: "line 2".into(),
                reason: "expected key=value".into()
            }
        );
        assert!(parse_properties("=value").is_err());
    }
}
