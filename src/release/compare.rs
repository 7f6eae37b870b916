//! Version string comparison.
//!
//! Release tags are compared with a deliberately simplified scheme rather
//! than full semantic-versioning precedence: a leading `v` is stripped,
//! everything from the first hyphen onward is discarded (pre-release and
//! build suffixes do not participate in ordering), and the remaining
//! dot-separated segments are compared as non-negative integers with
//! missing trailing components treated as zero.
//!
//! Malformed input never produces a spurious update: any parse failure on
//! either side yields [`Ordering::Equal`].

use std::cmp::Ordering;

/// Compare two version strings.
///
/// ```
/// use std::cmp::Ordering;
/// use upkeeper::release::compare;
///
/// assert_eq!(compare("2.0.0", "1.9.9"), Ordering::Greater);
/// assert_eq!(compare("v1.2", "1.2.0"), Ordering::Equal);
/// assert_eq!(compare("1.3.0-rc.1", "1.3.0"), Ordering::Equal);
/// assert_eq!(compare("garbage", "1.0.0"), Ordering::Equal);
/// ```
pub fn compare(a: &str, b: &str) -> Ordering {
    let (Some(a), Some(b)) = (normalize(a), normalize(b)) else {
        return Ordering::Equal;
    };

    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

/// Parse a version string into numeric components, or `None` if any
/// component fails to parse.
fn normalize(version: &str) -> Option<Vec<u64>> {
    let core = version.trim().trim_start_matches('v');
    let core = core.split('-').next().unwrap_or(core);
    core.split('.').map(|part| part.parse::<u64>().ok()).collect()
}
