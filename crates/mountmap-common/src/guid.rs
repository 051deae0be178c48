//! Canonical mixed-endian GUID text formatting, built on the real `uguid`
//! crate. `uguid::Guid::from_bytes`/`to_bytes` already treat the first
//! three fields as little-endian and the clock-sequence/node bytes as
//! stored verbatim, which is exactly the mixed-endian layout Microsoft
//! uses for on-disk GUIDs (and what `DMIO:ID:` GPT-partition blobs and
//! volume keys carry) — see `uguid::Guid` in the example pack.

use uguid::Guid;

/// Parse 16 raw mixed-endian GUID bytes into the canonical uppercase
/// `8-4-4-4-12` text form required by §3/§4.3.
pub fn bytes_to_canonical_string(bytes: [u8; 16]) -> String {
    Guid::from_bytes(bytes).to_string().to_ascii_uppercase()
}

/// Inverse of [`bytes_to_canonical_string`]: parse a canonical (case
/// insensitive) `8-4-4-4-12` GUID string back into its 16 raw mixed-endian
/// bytes.
pub fn canonical_string_to_bytes(s: &str) -> Option<[u8; 16]> {
    Guid::try_parse(s).ok().map(Guid::to_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s2_gpt_guid_round_trip() {
        // S2 from the testable-properties scenarios.
        let bytes: [u8; 16] = [
            0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE,
            0xFF, 0x00,
        ];
        let text = bytes_to_canonical_string(bytes);
        assert_eq!(text, "44332211-6655-8877-99AA-BBCCDDEEFF00");
        assert_eq!(canonical_string_to_bytes(&text), Some(bytes));
    }
}
