use std::borrow::Cow;

/// Introduces an escape sequence; escaped first so the two can't collide.
const ESCAPE: char = '%';
/// Nested field path separator in the store.
const SEPARATOR: char = '.';

const ESCAPED_ESCAPE: &str = "%25";
const ESCAPED_SEPARATOR: &str = "%2e";

/// Encode a session key for use as a single field path segment.
pub fn encode_key(key: &str) -> Cow<'_, str> {
    if !key.contains([ESCAPE, SEPARATOR]) {
        return Cow::Borrowed(key);
    }
    let mut encoded = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        match ch {
            ESCAPE => encoded.push_str(ESCAPED_ESCAPE),
            SEPARATOR => encoded.push_str(ESCAPED_SEPARATOR),
            c => encoded.push(c),
        }
    }
    Cow::Owned(encoded)
}

/// Inverse of [`encode_key`]. Only `%25` and `%2e` (either case) are
/// decoded; any other `%` sequence is kept literally.
pub fn decode_key(encoded: &str) -> Cow<'_, str> {
    if !encoded.contains(ESCAPE) {
        return Cow::Borrowed(encoded);
    }
    let mut decoded = String::with_capacity(encoded.len());
    let mut rest = encoded;
    while let Some(pos) = rest.find(ESCAPE) {
        decoded.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with(ESCAPED_ESCAPE) {
            decoded.push(ESCAPE);
            rest = &tail[3..];
        } else if tail
            .get(..3)
            .is_some_and(|seq| seq.eq_ignore_ascii_case(ESCAPED_SEPARATOR))
        {
            decoded.push(SEPARATOR);
            rest = &tail[3..];
        } else {
            decoded.push(ESCAPE);
            rest = &tail[1..];
        }
    }
    decoded.push_str(rest);
    Cow::Owned(decoded)
}
