//! Node identity: a 16-byte random id, rendered externally as uppercase hex.

use uuid::Uuid;

/// Generate a fresh 16-byte node identifier. Chosen once per node; never reused.
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// External representation used on the wire and in the event/command APIs.
pub fn to_hex(id: &Uuid) -> String {
    hex::encode_upper(id.as_bytes())
}

/// Parse the external hex representation back into raw bytes, for identities
/// surfaced as peer UUIDs on inbound frames.
pub fn from_bytes(bytes: [u8; 16]) -> Uuid {
    Uuid::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip_is_uppercase_and_32_chars() {
        let id = generate();
        let hex = to_hex(&id);
        assert_eq!(hex.len(), 32);
        assert_eq!(hex, hex.to_uppercase());
    }
}
