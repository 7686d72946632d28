//! Resource name sanitization shared by every object the runtime writes.

/// Longest name the orchestrator accepts for most object kinds.
pub const MAX_NAME_LEN: usize = 253;

/// Lowercase, map `/`, `.` and `_` to `-`, cap at `MAX_NAME_LEN` bytes.
pub fn sanitize(v: &str) -> String {
    let mut out: String = v
        .chars()
        .map(|c| match c {
            '/' | '.' | '_' => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect();
    if out.len() > MAX_NAME_LEN {
        let mut cut = MAX_NAME_LEN;
        while !out.is_char_boundary(cut) { cut -= 1; }
        out.truncate(cut);
    }
    out
}

/// Name of the Deployment/Service pair backing a logical service.
pub fn object_name(name: &str, version: &str) -> String {
    if version.is_empty() { sanitize(name) } else { sanitize(&format!("{}-{}", name, version)) }
}

/// Name of the opaque secret holding a logical service's credentials.
pub fn credentials_name(name: &str, version: &str) -> String {
    sanitize(&format!("{}-{}-credentials", name, version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_lowercases_and_replaces_separators() {
        assert_eq!(sanitize("Foo.Bar/baz_qux"), "foo-bar-baz-qux");
        assert_eq!(sanitize("already-ok"), "already-ok");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "a".repeat(300);
        assert_eq!(sanitize(&long).len(), MAX_NAME_LEN);
    }

    #[test]
    fn credentials_name_is_deterministic() {
        assert_eq!(credentials_name("api", "v1"), "api-v1-credentials");
        assert_eq!(credentials_name("Billing.API", "1.0"), "billing-api-1-0-credentials");
    }

    #[test]
    fn object_name_omits_empty_version() {
        assert_eq!(object_name("api", "v1"), "api-v1");
        assert_eq!(object_name("api", ""), "api");
    }
}
