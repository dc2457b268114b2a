//! Address helpers shared by the error classifier.
//!
//! Gateway error messages embed the offending contract address in free-form
//! text ("Requested contract address 0x... is not deployed"). These helpers
//! pull the first such address out and compare addresses structurally,
//! ignoring case and leading-zero padding.

/// Extract the first `0x`-prefixed hex substring from free-form text.
///
/// Tolerates zero, one, or many candidates; only the first is returned.
pub fn extract_hex_address(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'0' && (bytes[i + 1] == b'x' || bytes[i + 1] == b'X') {
            let start = i;
            let mut end = i + 2;
            while end < bytes.len() && bytes[end].is_ascii_hexdigit() {
                end += 1;
            }
            if end > i + 2 {
                return Some(&text[start..end]);
            }
            // "0x" with no digits, keep scanning past it
            i = end;
        } else {
            i += 1;
        }
    }
    None
}

/// Structural address equality: case-insensitive, `0x` prefix and
/// leading-zero padding ignored. Two empty addresses are not equal.
pub fn addresses_equal(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    !a.is_empty() && a.eq_ignore_ascii_case(&b)
}

fn normalize(address: &str) -> &str {
    let stripped = address
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    let unpadded = stripped.trim_start_matches('0');
    // all-zero address normalizes to a single zero, not to nothing
    if unpadded.is_empty() && !stripped.is_empty() {
        "0"
    } else {
        unpadded
    }
}
