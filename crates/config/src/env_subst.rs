/// Expand `${VAR}` and `${VAR:-fallback}` placeholders in raw config text.
///
/// Unset variables without a fallback are left as written, as are unterminated
/// placeholders.
pub fn substitute_env(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            result.push_str(&rest[start..]);
            return result;
        };
        let body = &after[..end];
        match expand(body) {
            Some(value) => result.push_str(&value),
            None => result.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    result
}

fn expand(body: &str) -> Option<String> {
    let (name, fallback) = match body.split_once(":-") {
        Some((name, fallback)) => (name, Some(fallback)),
        None => (body, None),
    };
    if name.is_empty() {
        return None;
    }
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty() || fallback.is_none())
        .or_else(|| fallback.map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Cargo sets CARGO_PKG_NAME for test binaries, so no env mutation is needed.

    #[test]
    fn substitutes_known_var() {
        assert_eq!(
            substitute_env("crate=${CARGO_PKG_NAME}"),
            format!("crate={}", env!("CARGO_PKG_NAME"))
        );
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_env("${DOCKET_NONEXISTENT_XYZ}"),
            "${DOCKET_NONEXISTENT_XYZ}"
        );
    }

    #[test]
    fn uses_fallback_for_unknown_var() {
        assert_eq!(
            substitute_env("url = \"${DOCKET_NONEXISTENT_XYZ:-sqlite::memory:}\""),
            "url = \"sqlite::memory:\""
        );
    }

    #[test]
    fn known_var_beats_fallback() {
        assert_eq!(
            substitute_env("${CARGO_PKG_NAME:-other}"),
            env!("CARGO_PKG_NAME")
        );
    }

    #[test]
    fn malformed_placeholders_kept() {
        assert_eq!(substitute_env("a ${ b"), "a ${ b");
        assert_eq!(substitute_env("${}"), "${}");
        assert_eq!(substitute_env("$HOME"), "$HOME");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
