//! Minimal semver parsing and comparison, ported from the reference
//! implementation's `parse_semver`/`is_newer` (no pulled-in `semver`
//! crate dependency — the original only ever needed exactly this).

/// A parsed `MAJOR.MINOR.PATCH[-PRERELEASE]` version, with an optional
/// leading `v` already stripped.
pub type ParsedVersion = (u64, u64, u64, String);

/// Parse a version string. Returns `None` for anything that isn't
/// `MAJOR.MINOR.PATCH` with optional `-prerelease`, mirroring the
/// original's deliberately strict grammar (exactly three dot-separated
/// numeric components, no leading/trailing garbage).
pub fn parse_semver(input: &str) -> Option<ParsedVersion> {
    let input = input.strip_prefix('v').unwrap_or(input);
    let (core, prerelease) = match input.split_once('-') {
        Some((core, pre)) => (core, pre),
        None => (input, ""),
    };

    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() != 3 {
        return None;
    }

    let major = parts[0].parse::<u64>().ok()?;
    let minor = parts[1].parse::<u64>().ok()?;
    let patch = parts[2].parse::<u64>().ok()?;

    Some((major, minor, patch, prerelease.to_string()))
}

/// Is `a` newer than `b`? Invalid input on either side never raises — it
/// is simply "not newer" (the update executor must never crash on a
/// malformed tag from a remote source).
///
/// A release (`prerelease` empty) is newer than a pre-release of the
/// same `MAJOR.MINOR.PATCH`. Two pre-releases of the same core version
/// compare by prerelease string ordering.
pub fn is_newer(a: &str, b: &str) -> bool {
    let (Some(a), Some(b)) = (parse_semver(a), parse_semver(b)) else {
        return false;
    };

    let (a_major, a_minor, a_patch, a_pre) = a;
    let (b_major, b_minor, b_patch, b_pre) = b;

    if a_major != b_major {
        return a_major > b_major;
    }
    if a_minor != b_minor {
        return a_minor > b_minor;
    }
    if a_patch != b_patch {
        return a_patch > b_patch;
    }

    match (a_pre.is_empty(), b_pre.is_empty()) {
        (true, false) => true,
        (false, true) => false,
        (true, true) => false,
        (false, false) => a_pre > b_pre,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_version() {
        assert_eq!(parse_semver("1.2.3"), Some((1, 2, 3, String::new())));
    }

    #[test]
    fn strips_leading_v() {
        assert_eq!(parse_semver("v1.2.3"), Some((1, 2, 3, String::new())));
    }

    #[test]
    fn parses_prerelease() {
        assert_eq!(parse_semver("1.2.3-beta.1"), Some((1, 2, 3, "beta.1".to_string())));
    }

    #[test]
    fn rejects_invalid_input() {
        assert_eq!(parse_semver(""), None);
        assert_eq!(parse_semver("1.2"), None);
        assert_eq!(parse_semver("1.2.3.4"), None);
        assert_eq!(parse_semver("a.b.c"), None);
        assert_eq!(parse_semver("1.2.3-"), Some((1, 2, 3, String::new())));
        assert_eq!(parse_semver("1.2.3 trailing garbage"), None);
    }

    #[test]
    fn is_newer_compares_major_minor_patch() {
        assert!(is_newer("2.0.0", "1.0.0"));
        assert!(is_newer("1.1.0", "1.0.0"));
        assert!(is_newer("1.0.1", "1.0.0"));
        assert!(!is_newer("1.0.0", "1.0.1"));
        assert!(!is_newer("1.0.0", "1.0.0"));
    }

    #[test]
    fn release_beats_prerelease_of_same_core_version() {
        assert!(is_newer("1.0.0", "1.0.0-beta"));
        assert!(!is_newer("1.0.0-beta", "1.0.0"));
    }

    #[test]
    fn invalid_input_is_never_newer() {
        assert!(!is_newer("garbage", "1.0.0"));
        assert!(!is_newer("1.0.0", "garbage"));
        assert!(!is_newer("", ""));
    }

    #[test]
    fn spec_boundary_examples() {
        assert!(is_newer("v2.0.0", "v1.0.0"));
        assert!(is_newer("1.0.0", "1.0.0-beta"));
        assert!(!is_newer("1.0.0-beta", "1.0.0"));
        assert!(!is_newer("bad", "1.0.0"));
    }

    #[test]
    fn antisymmetric_and_irreflexive() {
        assert!(is_newer("2.0.0", "1.0.0"));
        assert!(!is_newer("1.0.0", "2.0.0"));
        assert!(!is_newer("1.2.3", "1.2.3"));
    }
}
