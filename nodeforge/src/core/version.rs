//! Semantic version helpers for node directories.

use semver::Version;

/// Version assigned to every newly created node.
pub const INITIAL_VERSION: Version = Version::new(1, 0, 0);

/// Parse a version directory segment (`1.0.2`, tolerating a leading `v`).
pub fn parse_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(trimmed).ok()
}

/// Next version for an update: patch component incremented by one.
///
/// Pre-release and build metadata are dropped. `None` when the patch
/// component is already at its maximum.
pub fn bump_patch(version: &Version) -> Option<Version> {
    let patch = version.patch.checked_add(1)?;
    Some(Version::new(version.major, version.minor, patch))
}

/// A reference bump that keeps the major version and never goes backwards.
pub fn is_compatible_bump(old: &Version, new: &Version) -> bool {
    old.major == new.major && new >= old
}

/// Highest parseable version among directory names.
pub fn highest<'a, I>(names: I) -> Option<Version>
where
    I: IntoIterator<Item = &'a str>,
{
    names.into_iter().filter_map(parse_version).max()
}
