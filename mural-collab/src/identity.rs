//! Room codes and participant display names.
//!
//! Both are derived from UUID entropy rather than a seeded RNG so they stay
//! deterministic per connection and need no extra dependency.

use uuid::Uuid;

/// Adjectives for anonymous display names.
const ADJECTIVES: [&str; 10] = [
    "Swift", "Cosmic", "Neon", "Bright", "Silent", "Frosted", "Golden", "Pixel", "Vivid", "Shadow",
];

/// Nouns for anonymous display names.
const NOUNS: [&str; 10] = [
    "Fox", "Comet", "Wave", "Spark", "Owl", "Phoenix", "Tiger", "Star", "Panda", "Falcon",
];

/// Symbols allowed in a room code: uppercase letters and digits.
const CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Room codes are always exactly this many symbols.
pub const ROOM_CODE_LEN: usize = 6;

/// Derive a stable adjective+noun display name from a connection id.
///
/// The same id always maps to the same name, so reconnecting under a new id
/// yields a new identity while a live connection never changes names.
pub fn display_name(conn_id: Uuid) -> String {
    let bits = conn_id.as_u128();
    let adjective = ADJECTIVES[(bits & 0xFF) as usize % ADJECTIVES.len()];
    let noun = NOUNS[((bits >> 8) & 0xFF) as usize % NOUNS.len()];
    format!("{adjective}{noun}")
}

/// A validated six-symbol room code over `A-Z0-9`.
///
/// Codes are case-insensitive on input and canonically uppercase, so
/// `abc123` and `ABC123` address the same room. The byte representation is
/// fixed-width, which makes codes usable directly as store key prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode(String);

impl RoomCode {
    /// Generate a fresh random code. Uniqueness is the registry's concern;
    /// this only guarantees well-formedness.
    pub fn generate() -> Self {
        let mut bits = Uuid::new_v4().as_u128();
        let mut code = String::with_capacity(ROOM_CODE_LEN);
        for _ in 0..ROOM_CODE_LEN {
            code.push(CODE_ALPHABET[(bits % 36) as usize] as char);
            bits /= 36;
        }
        Self(code)
    }

    /// Parse and canonicalize a client-supplied code.
    pub fn parse(input: &str) -> Result<Self, InvalidRoomCode> {
        let canonical = input.trim().to_ascii_uppercase();
        let well_formed = canonical.len() == ROOM_CODE_LEN
            && canonical
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
        if !well_formed {
            return Err(InvalidRoomCode(input.to_string()));
        }
        Ok(Self(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exactly [`ROOM_CODE_LEN`] bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Display for RoomCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A room code that failed validation.
#[derive(Debug, Clone)]
pub struct InvalidRoomCode(pub String);

impl std::fmt::Display for InvalidRoomCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid room code: {:?}", self.0)
    }
}

impl std::error::Error for InvalidRoomCode {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_stable() {
        let id = Uuid::new_v4();
        assert_eq!(display_name(id), display_name(id));
    }

    #[test]
    fn test_display_name_shape() {
        for _ in 0..50 {
            let name = display_name(Uuid::new_v4());
            let adjective = ADJECTIVES
                .iter()
                .find(|a| name.starts_with(**a))
                .unwrap_or_else(|| panic!("Name {name} has no known adjective"));
            let noun = &name[adjective.len()..];
            assert!(NOUNS.contains(&noun), "Name {name} has unknown noun {noun}");
        }
    }

    #[test]
    fn test_generate_is_well_formed() {
        for _ in 0..100 {
            let code = RoomCode::generate();
            assert_eq!(code.as_str().len(), ROOM_CODE_LEN);
            assert!(RoomCode::parse(code.as_str()).is_ok());
        }
    }

    #[test]
    fn test_parse_canonicalizes_case() {
        let lower = RoomCode::parse("abc123").unwrap();
        let upper = RoomCode::parse("ABC123").unwrap();
        assert_eq!(lower, upper);
        assert_eq!(lower.as_str(), "ABC123");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let code = RoomCode::parse(" xy99zz ").unwrap();
        assert_eq!(code.as_str(), "XY99ZZ");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "ABC12", "ABC1234", "ABC 12", "ABC-12", "ÄBC123"] {
            assert!(RoomCode::parse(bad).is_err(), "Accepted {bad:?}");
        }
    }

    #[test]
    fn test_as_bytes_fixed_width() {
        let code = RoomCode::parse("ROOM42").unwrap();
        assert_eq!(code.as_bytes(), b"ROOM42");
        assert_eq!(code.as_bytes().len(), ROOM_CODE_LEN);
    }
}
