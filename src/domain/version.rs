use crate::error::{LineageError, Result};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

/// Matches a kernel-style release tag prefix:
/// `v5.15`, `v5.15.3`, `v5.16-rc2`, `v5.15.3-rt20`, `v6.1-rc1-rt1`, `v5.10-dontuse`.
fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(v?)(\d+)\.(\d+)(?:\.(\d+))?(?:-rc(\d+))?(?:-rt(\d+))?(-dontuse|-rebase|-patches)?",
        )
        .expect("static tag pattern")
    })
}

/// Compare two dotted version strings numerically, field by field.
///
/// A leading `v` is ignored. When one version is a prefix of the other the
/// shorter one sorts first, so `v5.15 < v5.15.0`.
///
/// # Errors
/// Returns a version error if any field is not a decimal number.
///
/// # Example
/// ```
/// # use patch_lineage::domain::version::compare_version;
/// # use std::cmp::Ordering;
/// assert_eq!(compare_version("v5.9", "v5.10").unwrap(), Ordering::Less);
/// ```
pub fn compare_version(a: &str, b: &str) -> Result<Ordering> {
    Ok(version_fields(a)?.cmp(&version_fields(b)?))
}

fn version_fields(version: &str) -> Result<Vec<u64>> {
    version
        .trim_start_matches('v')
        .split('.')
        .map(|field| {
            field.parse::<u64>().map_err(|_| {
                LineageError::version(format!("Invalid version field '{}' in '{}'", field, version))
            })
        })
        .collect()
}

/// Ordering used by `git tag --sort=v:refname`: runs of digits compare
/// numerically, everything else byte-wise.
pub fn version_refname_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.as_bytes();
    let mut right = b.as_bytes();

    loop {
        match (left.first(), right.first()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let l_len = left.iter().take_while(|c| c.is_ascii_digit()).count();
                let r_len = right.iter().take_while(|c| c.is_ascii_digit()).count();
                let l_num = trim_leading_zeros(&left[..l_len]);
                let r_num = trim_leading_zeros(&right[..r_len]);
                let ord = l_num.len().cmp(&r_num.len()).then_with(|| l_num.cmp(r_num));
                if ord != Ordering::Equal {
                    return ord;
                }
                left = &left[l_len..];
                right = &right[r_len..];
            }
            (Some(l), Some(r)) => {
                if l != r {
                    return l.cmp(r);
                }
                left = &left[1..];
                right = &right[1..];
            }
        }
    }
}

fn trim_leading_zeros(digits: &[u8]) -> &[u8] {
    let zeros = digits.iter().take_while(|&&c| c == b'0').count();
    if zeros == digits.len() {
        &digits[digits.len().saturating_sub(1)..]
    } else {
        &digits[zeros..]
    }
}

/// Numeric base of a release: `major.minor[.micro]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BaseVersion {
    pub major: u32,
    pub minor: u32,
    pub micro: Option<u32>,
}

impl BaseVersion {
    pub fn new(major: u32, minor: u32, micro: Option<u32>) -> Self {
        BaseVersion {
            major,
            minor,
            micro,
        }
    }

    /// The `major.minor` series this version belongs to.
    pub fn series(&self) -> BaseVersion {
        BaseVersion::new(self.major, self.minor, None)
    }
}

impl fmt::Display for BaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.micro {
            Some(micro) => write!(f, "{}.{}.{}", self.major, self.minor, micro),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

/// A parsed release tag such as `v5.15.3-rt20`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTag {
    pub raw: String,
    pub prefix: String,
    pub base: BaseVersion,
    pub rc: Option<u32>,
    pub rt: Option<u32>,
    /// Tags marked `-dontuse`, `-rebase` or `-patches`
    pub excluded: bool,
}

impl VersionTag {
    /// Parse a tag, returning `None` when it has no version-like prefix.
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = tag_regex().captures(raw)?;
        let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

        Some(VersionTag {
            raw: raw.to_string(),
            prefix: caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
            base: BaseVersion::new(number(2)?, number(3)?, number(4)),
            rc: number(5),
            rt: number(6),
            excluded: caps.get(7).is_some(),
        })
    }

    /// Parse a tag that must be well formed.
    pub fn parse_strict(raw: &str) -> Result<Self> {
        Self::parse(raw).ok_or_else(|| {
            LineageError::version(format!("Unrecognized kernel base version {}", raw))
        })
    }

    /// `v5.15` for every tag of the 5.15 series.
    pub fn series_key(&self) -> String {
        format!("{}{}", self.prefix, self.base.series())
    }

    /// `v5.15.3` for `v5.15.3-rc1`; the release an rc tag is waiting for.
    pub fn release_key(&self) -> String {
        format!("{}{}", self.prefix, self.base)
    }

    pub fn is_rc(&self) -> bool {
        self.rc.is_some()
    }

    pub fn is_rt(&self) -> bool {
        self.rt.is_some()
    }
}

impl PartialOrd for VersionTag {
    /// Realtime tags are only comparable with other realtime tags.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.is_rt() != other.is_rt() {
            return None;
        }
        // An rc precedes the final release of the same base.
        let rc_rank = |tag: &VersionTag| tag.rc.map_or((1, 0), |rc| (0, rc));
        Some(
            self.base
                .cmp(&other.base)
                .then_with(|| rc_rank(self).cmp(&rc_rank(other)))
                .then_with(|| self.rt.cmp(&other.rt)),
        )
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_compare_version_numeric() {
        assert_eq!(compare_version("v5.9", "v5.10").unwrap(), Ordering::Less);
        assert_eq!(compare_version("5.10", "v5.9").unwrap(), Ordering::Greater);
        assert_eq!(compare_version("v5.15", "5.15").unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_compare_version_shorter_is_less() {
        assert_eq!(compare_version("v5.15", "v5.15.0").unwrap(), Ordering::Less);
        assert_eq!(compare_version("v5.15.1", "v5.15").unwrap(), Ordering::Greater);
    }

    #[test]
    fn test_compare_version_rejects_garbage() {
        assert!(compare_version("v5.15-rc1", "v5.15").is_err());
        assert!(compare_version("vx.y", "v1.0").is_err());
    }

    #[test]
    fn test_refname_order() {
        let mut tags = vec!["v5.10", "v5.9", "v5.15.2", "v5.15.10", "v5.15"];
        tags.sort_by(|a, b| version_refname_cmp(a, b));
        assert_eq!(tags, vec!["v5.9", "v5.10", "v5.15", "v5.15.2", "v5.15.10"]);
    }

    #[test]
    fn test_parse_full_tag() {
        let tag = VersionTag::parse("v5.15.3-rt20").unwrap();
        assert_eq!(tag.base, BaseVersion::new(5, 15, Some(3)));
        assert_eq!(tag.rt, Some(20));
        assert_eq!(tag.rc, None);
        assert_eq!(tag.series_key(), "v5.15");
        assert_eq!(tag.release_key(), "v5.15.3");
        assert!(!tag.excluded);
    }

    #[test]
    fn test_parse_rc_rt_and_excluded() {
        let tag = VersionTag::parse("v6.1-rc2-rt1").unwrap();
        assert_eq!(tag.rc, Some(2));
        assert_eq!(tag.rt, Some(1));

        let tag = VersionTag::parse("v5.10-dontuse").unwrap();
        assert!(tag.excluded);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(VersionTag::parse("release-1").is_none());
        assert!(VersionTag::parse("latest").is_none());
        assert!(VersionTag::parse_strict("foo").is_err());
    }

    #[test]
    fn test_rc_before_release_before_next_rc() {
        let rc1 = VersionTag::parse("v5.15-rc1").unwrap();
        let rc2 = VersionTag::parse("v5.15-rc2").unwrap();
        let rel = VersionTag::parse("v5.15").unwrap();
        let next = VersionTag::parse("v5.15.1-rc1").unwrap();
        assert!(rc1 < rc2);
        assert!(rc2 < rel);
        assert!(rel < next);
    }

    #[test]
    fn test_rt_only_comparable_with_rt() {
        let rt = VersionTag::parse("v5.15-rt17").unwrap();
        let rt2 = VersionTag::parse("v5.15-rt18").unwrap();
        let plain = VersionTag::parse("v5.15").unwrap();
        assert_eq!(rt.partial_cmp(&plain), None);
        assert!(rt < rt2);
    }

    fn version_string() -> impl Strategy<Value = String> {
        prop::collection::vec(0u32..40, 1..4).prop_map(|fields| {
            let joined: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
            format!("v{}", joined.join("."))
        })
    }

    proptest! {
        #[test]
        fn prop_compare_version_antisymmetric(a in version_string(), b in version_string()) {
            let ab = compare_version(&a, &b).unwrap();
            let ba = compare_version(&b, &a).unwrap();
            prop_assert_eq!(ab, ba.reverse());
        }

        #[test]
        fn prop_compare_version_transitive(
            a in version_string(),
            b in version_string(),
            c in version_string()
        ) {
            let ab = compare_version(&a, &b).unwrap();
            let bc = compare_version(&b, &c).unwrap();
            if ab != Ordering::Greater && bc != Ordering::Greater {
                prop_assert_ne!(compare_version(&a, &c).unwrap(), Ordering::Greater);
            }
        }
    }
}
