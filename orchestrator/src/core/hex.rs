//! Hexadecimal quantity decoding for JSON-RPC fields.

/// Decode a hex quantity such as `"0x1a"` into a `u64`.
///
/// Accepts an optional `0x`/`0X` prefix and surrounding whitespace. Returns
/// `None` for empty input, non-hex characters (including signs) and values
/// that overflow `u64`.
pub fn parse_hex_u64(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}
