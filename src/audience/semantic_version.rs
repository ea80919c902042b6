//! Semantic version comparison used by the `semver_*` match types.
//!
//! Comparison is partial: a target of `"2.1"` matches any `"2.1.x"` version. Pre-release (`-`) and
//! build (`+`) suffixes are compared as strings, and a pre-release sorts before its release.
//!
//! The `semver` crate is not used here: its `Version` requires all three components and rejects
//! leading zeros, while conditions use short targets as prefixes and accept versions like `"2"`
//! or `"1.02.3"`.
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid semantic version")]
pub(crate) struct InvalidVersion;

#[derive(Debug)]
struct SemanticVersion<'a> {
    parts: Vec<&'a str>,
    pre_release: bool,
}

impl<'a> SemanticVersion<'a> {
    fn parse(version: &'a str) -> Result<Self, InvalidVersion> {
        if version.chars().any(char::is_whitespace) {
            return Err(InvalidVersion);
        }

        let pre_release = is_pre_release(version);
        let (prefix, suffix) = if pre_release || is_build(version) {
            let separator = if pre_release { '-' } else { '+' };
            match version.split_once(separator) {
                Some((prefix, suffix)) if !prefix.is_empty() && !suffix.is_empty() => {
                    (prefix, Some(suffix))
                }
                _ => return Err(InvalidVersion),
            }
        } else {
            (version, None)
        };

        let dot_count = prefix.matches('.').count();
        if dot_count > 2 {
            return Err(InvalidVersion);
        }

        let mut parts: Vec<&str> = prefix.split('.').filter(|p| !p.is_empty()).collect();
        if parts.len() != dot_count + 1 || !parts.iter().all(|p| is_number(p)) {
            return Err(InvalidVersion);
        }
        parts.extend(suffix);

        Ok(SemanticVersion { parts, pre_release })
    }
}

/// Compare a user-supplied `version` with the `target` from a condition.
pub(crate) fn compare_versions(version: &str, target: &str) -> Result<Ordering, InvalidVersion> {
    let target = SemanticVersion::parse(target)?;
    let version = SemanticVersion::parse(version)?;

    for (idx, target_part) in target.parts.iter().enumerate() {
        let Some(part) = version.parts.get(idx) else {
            return Ok(if target.pre_release {
                Ordering::Greater
            } else {
                Ordering::Less
            });
        };

        if !is_number(part) {
            match part.cmp(target_part) {
                Ordering::Less => {
                    return Ok(if target.pre_release && !version.pre_release {
                        Ordering::Greater
                    } else {
                        Ordering::Less
                    })
                }
                Ordering::Greater => {
                    return Ok(if !target.pre_release && version.pre_release {
                        Ordering::Less
                    } else {
                        Ordering::Greater
                    })
                }
                Ordering::Equal => {}
            }
        } else if let (Ok(part), Ok(target_part)) = (part.parse::<u64>(), target_part.parse::<u64>())
        {
            match part.cmp(&target_part) {
                Ordering::Equal => {}
                ordering => return Ok(ordering),
            }
        } else {
            return Ok(Ordering::Less);
        }
    }

    if version.pre_release && !target.pre_release {
        return Ok(Ordering::Less);
    }

    Ok(Ordering::Equal)
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_pre_release(s: &str) -> bool {
    s.find('-').unwrap_or(usize::MAX) < s.find('+').unwrap_or(usize::MAX)
}

fn is_build(s: &str) -> bool {
    s.find('+').unwrap_or(usize::MAX) < s.find('-').unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering::*;

    use super::*;

    fn cmp(version: &str, target: &str) -> std::cmp::Ordering {
        compare_versions(version, target).unwrap()
    }

    #[test]
    fn partial_target_matches_prefix() {
        assert_eq!(cmp("2.0.1", "2.0"), Equal);
        assert_eq!(cmp("2.9.1", "2.9"), Equal);
    }

    #[test]
    fn full_versions() {
        assert_eq!(cmp("2.0.1", "2.0.0"), Greater);
        assert_eq!(cmp("2.0.0", "2.0.1"), Less);
        assert_eq!(cmp("2.0.0", "2.0.0"), Equal);
        assert_eq!(cmp("2.3.1", "2.3.5"), Less);
        assert_eq!(cmp("2.9.1", "2.9.0"), Greater);
        assert_eq!(cmp("2.9.9", "2.9.9"), Equal);
    }

    #[test]
    fn major_and_minor_differences() {
        assert_eq!(cmp("2.0.1", "3.0"), Less);
        assert_eq!(cmp("3.0.1", "2.0"), Greater);
        assert_eq!(cmp("2.0.1", "2.3"), Less);
        assert_eq!(cmp("2.9.1", "2.0"), Greater);
    }

    #[test]
    fn shorter_version_is_less() {
        assert_eq!(cmp("2.9", "2.9.8"), Less);
    }

    #[test]
    fn pre_release() {
        assert_eq!(cmp("2.9.9-beta", "2.9.9-beta"), Equal);
        assert_eq!(cmp("2.1.3-beta", "2.1.2"), Greater);
        assert_eq!(cmp("2.1.2-beta", "2.1.2-release"), Less);
        assert_eq!(cmp("2.1.2-release", "2.1.2-beta"), Greater);
        assert_eq!(cmp("2.1.3-beta", "2.1.3"), Less);
        assert_eq!(cmp("2.1.3", "2.1.3-beta"), Greater);
    }

    #[test]
    fn equal_against_short_targets() {
        for (version, target) in [
            ("2.1.0", "2.1"),
            ("2.1.215", "2.1"),
            ("2.12", "2"),
            ("2.785.13", "2"),
        ] {
            assert_eq!(cmp(version, target), Equal, "{version} vs {target}");
        }
    }

    #[test]
    fn accepts_short_and_zero_padded_versions() {
        assert_eq!(cmp("2", "2"), Equal);
        assert_eq!(cmp("2", "1.9"), Greater);
        assert_eq!(cmp("1.02.3", "1.2.3"), Equal);
    }

    #[test]
    fn invalid_versions() {
        for version in [
            "-", ".", "..", "+", "+test", " ", "2 .3. 0", "2.", ".2.2", "3.7.2.2",
        ] {
            assert_eq!(
                compare_versions(version, "2.1.0"),
                Err(InvalidVersion),
                "{version:?}"
            );
        }
    }

    #[test]
    fn invalid_target() {
        assert_eq!(compare_versions("2.1.0", "2..1"), Err(InvalidVersion));
    }
}
