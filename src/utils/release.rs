/// Release version parsing and ordering
use once_cell::sync::Lazy;
use regex::Regex;

use super::repo::ReleaseInfo;

static VERSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)(?:-([a-z]+)\.(\d+))?").unwrap());

/// Suffix given to versions without a pre-release tag. It compares above
/// "alpha", "beta" and "rc".
pub const STABLE_SUFFIX: &str = "stable";

/// Comparison key of a parsed version. Field order is the comparison order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VersionKey {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub suffix: String,
    pub suffix_version: u64,
}

/// Result of parsing a release version string.
///
/// `Unparseable` orders below every parsed version and equal to any other
/// unparseable version, so a stable sort keeps unparseable releases in
/// catalog order ahead of everything else.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParsedVersion {
    Unparseable,
    Parsed(VersionKey),
}

pub fn parse_version(version: &str) -> ParsedVersion {
    let Some(caps) = VERSION_PATTERN.captures(version) else {
        return ParsedVersion::Unparseable;
    };

    let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());

    let (Some(major), Some(minor), Some(patch)) = (number(1), number(2), number(3)) else {
        return ParsedVersion::Unparseable;
    };

    let (suffix, suffix_version) = match caps.get(4) {
        Some(suffix) => match number(5) {
            Some(n) => (suffix.as_str().to_string(), n),
            None => return ParsedVersion::Unparseable,
        },
        None => (STABLE_SUFFIX.to_string(), 0),
    };

    ParsedVersion::Parsed(VersionKey {
        major,
        minor,
        patch,
        suffix,
        suffix_version,
    })
}

/// Stable ascending sort by parsed version
pub fn sort_releases(releases: &mut [ReleaseInfo]) {
    releases.sort_by_cached_key(|r| parse_version(&r.version));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(version: &str) -> ReleaseInfo {
        ReleaseInfo {
            version: version.to_string(),
            uf2file: None,
            binfile: None,
        }
    }

    fn versions(releases: &[ReleaseInfo]) -> Vec<&str> {
        releases.iter().map(|r| r.version.as_str()).collect()
    }

    #[test]
    fn test_parse_stable_and_prerelease() {
        assert_eq!(
            parse_version("8.2.0"),
            ParsedVersion::Parsed(VersionKey {
                major: 8,
                minor: 2,
                patch: 0,
                suffix: "stable".into(),
                suffix_version: 0,
            })
        );
        assert_eq!(
            parse_version("9.0.0-beta.1"),
            ParsedVersion::Parsed(VersionKey {
                major: 9,
                minor: 0,
                patch: 0,
                suffix: "beta".into(),
                suffix_version: 1,
            })
        );
        assert_eq!(parse_version("latest"), ParsedVersion::Unparseable);
        assert_eq!(parse_version(""), ParsedVersion::Unparseable);
    }

    #[test]
    fn test_prerelease_sorts_below_stable_of_same_version() {
        assert!(parse_version("9.0.0-rc.2") < parse_version("9.0.0"));
        assert!(parse_version("9.0.0-alpha.10") < parse_version("9.0.0-beta.1"));
        assert!(parse_version("9.0.0-beta.2") < parse_version("9.0.0-beta.10"));
        assert!(parse_version("8.10.0") > parse_version("8.9.9"));
    }

    #[test]
    fn test_sort_releases_is_non_decreasing() {
        let mut releases = vec![
            release("9.0.0"),
            release("9.0.0-beta.1"),
            release("8.2.10"),
            release("9.0.0-rc.1"),
            release("8.2.9"),
            release("10.0.0-alpha.3"),
        ];
        sort_releases(&mut releases);
        assert_eq!(
            versions(&releases),
            vec![
                "8.2.9",
                "8.2.10",
                "9.0.0-beta.1",
                "9.0.0-rc.1",
                "9.0.0",
                "10.0.0-alpha.3"
            ]
        );
        for pair in releases.windows(2) {
            assert!(parse_version(&pair[0].version) <= parse_version(&pair[1].version));
        }
    }

    #[test]
    fn test_unparseable_versions_go_first_in_catalog_order() {
        let mut releases = vec![
            release("8.2.0"),
            release("nightly"),
            release("7.3.3"),
            release("main"),
        ];
        sort_releases(&mut releases);
        assert_eq!(versions(&releases), vec!["nightly", "main", "7.3.3", "8.2.0"]);
    }

    #[test]
    fn test_equal_versions_keep_catalog_order() {
        let mut releases = vec![release("8.2.0"), release("7.0.0"), release("8.2.0")];
        releases[0].uf2file = Some("first".into());
        releases[2].uf2file = Some("second".into());
        sort_releases(&mut releases);
        assert_eq!(releases[1].uf2file.as_deref(), Some("first"));
        assert_eq!(releases[2].uf2file.as_deref(), Some("second"));
    }
}
