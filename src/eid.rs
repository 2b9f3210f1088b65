use rusty_ulid::{DecodingError, Ulid};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::{fmt::Display, ops::Deref};

/// Document key: a ULID string, so ids sort by creation time.
///
/// Ids read back from the database are trusted as they are. Ids coming
/// from outside (CLI, HTTP) go through [`FromStr`], which rejects anything
/// that is not a ULID and canonicalizes it to upper case.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(transparent)]
pub struct Eid(String);

impl Eid {
    pub fn new() -> Eid {
        Eid(Ulid::generate().to_string())
    }
}

impl Default for Eid {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for Eid {
    type Err = DecodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Eid(Ulid::from_str(s.trim())?.to_string()))
    }
}

impl Display for Eid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for Eid {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<String> for Eid {
    fn from(fr: String) -> Self {
        Eid(fr)
    }
}

impl From<&str> for Eid {
    fn from(fr: &str) -> Self {
        Eid(fr.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_unique_ulids() {
        let a = Eid::new();
        let b = Eid::new();
        assert_ne!(a, b);
        assert_eq!(a.len(), 26);
    }

    #[test]
    fn test_parse_canonicalizes_case() {
        let id = Eid::new();
        let parsed: Eid = id.to_lowercase().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_parse_rejects_non_ulids() {
        assert_eq!("".parse::<Eid>(), Err(DecodingError::InvalidLength));
        assert_eq!("lucid".parse::<Eid>(), Err(DecodingError::InvalidLength));
        assert!("01HZZZZZZZZZZZZZZZZZZZZZZU".parse::<Eid>().is_err());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = Eid::from("01HZZZZZZZZZZZZZZZZZZZZZZZ");
        assert_eq!(
            serde_json::to_string(&id).unwrap(),
            "\"01HZZZZZZZZZZZZZZZZZZZZZZZ\""
        );
        assert_eq!(id.to_string(), "01HZZZZZZZZZZZZZZZZZZZZZZZ");
    }
}
