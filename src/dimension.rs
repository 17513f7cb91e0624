//! The fixed descriptor-key → dimension → limit mapping from spec.md §3.

use std::fmt;

/// One of the four recognized rate-limit dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Ip,
    Path,
    Company,
    User,
}

impl Dimension {
    /// Map a recognized descriptor entry key to its dimension. Unrecognized
    /// keys (anything other than the four below) return `None` and are
    /// skipped by the scan in `engine.rs`.
    pub fn from_descriptor_key(key: &str) -> Option<Self> {
        match key {
            "remote_address" => Some(Dimension::Ip),
            "path" => Some(Dimension::Path),
            "company_id" => Some(Dimension::Company),
            "user_id" => Some(Dimension::User),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Ip => "ip",
            Dimension::Path => "path",
            Dimension::Company => "company",
            Dimension::User => "user",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the counter key `<dimension>:<value>` (spec.md §3).
pub fn counter_key(dimension: Dimension, value: &str) -> String {
    format!("{}:{}", dimension.as_str(), value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_recognized_keys() {
        assert_eq!(
            Dimension::from_descriptor_key("remote_address"),
            Some(Dimension::Ip)
        );
        assert_eq!(Dimension::from_descriptor_key("path"), Some(Dimension::Path));
        assert_eq!(
            Dimension::from_descriptor_key("company_id"),
            Some(Dimension::Company)
        );
        assert_eq!(Dimension::from_descriptor_key("user_id"), Some(Dimension::User));
        assert_eq!(Dimension::from_descriptor_key("foo"), None);
    }

    #[test]
    fn builds_counter_key() {
        assert_eq!(counter_key(Dimension::Ip, "10.0.0.1"), "ip:10.0.0.1");
    }
}
