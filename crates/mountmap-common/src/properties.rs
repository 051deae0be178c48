//! Device property maps and criteria matching (§4.2).
//!
//! The original source encodes the sentinel markers `ANY`/`NONE`/`IGNORE`/
//! `IMPOSSIBLE` as NUL-prefixed byte strings stuffed into an otherwise
//! string-valued map, so they can never collide with a real property value.
//! Here the same four sentinels are variants of [`PropertyValue`] instead,
//! per the distilled spec's own recommendation to prefer a sum type.

use std::collections::BTreeMap;

/// A criterion value: either a concrete string to match, or one of the four
/// sentinels from §4.2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    String(String),
    /// Requires the key to be present, with any value.
    Any,
    /// Requires the key to be absent.
    None,
    /// Never rejects; this criterion is skipped entirely.
    Ignore,
    /// Always rejects. Used to mark a property unavailable on this
    /// platform (e.g. MBR-id on macOS) so any criterion naming it fails
    /// fast instead of silently matching everything.
    Impossible,
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

/// An actual device's property map: plain strings only, no sentinels.
pub type Properties = BTreeMap<String, String>;

/// A query: property name to the value (or sentinel) it must match.
pub type Criteria = BTreeMap<String, PropertyValue>;

/// Evaluate `criteria` against an actual property map `props`, per the
/// table in §4.2.
pub fn matches(criteria: &Criteria, props: &Properties) -> bool {
    criteria.iter().all(|(key, want)| match want {
        PropertyValue::Ignore => true,
        PropertyValue::Any => props.contains_key(key),
        PropertyValue::None => !props.contains_key(key),
        PropertyValue::Impossible => false,
        PropertyValue::String(expected) => props.get(key) == Some(expected),
    })
}

/// Well-known property keys shared by both inventory backends (§6).
pub mod keys {
    pub const DEVICE_NAME: &str = "device-name";
    pub const MOUNTPOINT: &str = "mountpoint";
    pub const MAJOR: &str = "major";
    pub const MINOR: &str = "minor";
    pub const PART_UUID: &str = "part-uuid";
    pub const MBR_ID: &str = "mbr-id";
    pub const PART_OFFSET_BLOCKS: &str = "part-offset-blocks";
    pub const PART_OFFSET_BYTES: &str = "part-offset-bytes";
    pub const FS_TYPE: &str = "fs-type";
    pub const FS_LABEL: &str = "fs-label";
    pub const HARDWARE: &str = "hardware";
    pub const LBA_SIZE: &str = "lba-size";
    pub const DISK_ID: &str = "disk-id";
    pub const IS_NTFS: &str = "is-ntfs";
    pub const MOUNTABLE_PATH: &str = "mountable-path";
    pub const READABLE_PATH: &str = "readable-path";
    pub const IS_DISK: &str = "is-disk";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_never_rejects() {
        let mut criteria = Criteria::new();
        criteria.insert("missing".into(), PropertyValue::Ignore);
        assert!(matches(&criteria, &Properties::new()));
    }

    #[test]
    fn ignore_pair_is_equivalent_to_removing_it() {
        // property 3 of §8: matching with (k, IGNORE) == matching with
        // that pair removed, for any props.
        let mut props = Properties::new();
        props.insert("fs-type".into(), "ntfs".into());

        let mut with_ignore = Criteria::new();
        with_ignore.insert("fs-type".into(), "ntfs".into());
        with_ignore.insert("unrelated".into(), PropertyValue::Ignore);

        let mut without = Criteria::new();
        without.insert("fs-type".into(), "ntfs".into());

        assert_eq!(matches(&with_ignore, &props), matches(&without, &props));
    }

    #[test]
    fn any_requires_presence() {
        let mut criteria = Criteria::new();
        criteria.insert("part-uuid".into(), PropertyValue::Any);

        let mut props = Properties::new();
        assert!(!matches(&criteria, &props));

        props.insert("part-uuid".into(), "ABCD".into());
        assert!(matches(&criteria, &props));
    }

    #[test]
    fn none_requires_absence() {
        let mut criteria = Criteria::new();
        criteria.insert("mbr-id".into(), PropertyValue::None);

        let mut props = Properties::new();
        assert!(matches(&criteria, &props));

        props.insert("mbr-id".into(), "12345678".into());
        assert!(!matches(&criteria, &props));
    }

    #[test]
    fn impossible_always_rejects() {
        let mut criteria = Criteria::new();
        criteria.insert("mbr-id".into(), PropertyValue::Impossible);

        let mut props = Properties::new();
        props.insert("mbr-id".into(), "12345678".into());
        assert!(!matches(&criteria, &props));
        assert!(!matches(&criteria, &Properties::new()));
    }

    #[test]
    fn ordinary_requires_exact_value() {
        let mut criteria = Criteria::new();
        criteria.insert("fs-type".into(), "ntfs".into());

        let mut props = Properties::new();
        props.insert("fs-type".into(), "ext4".into());
        assert!(!matches(&criteria, &props));

        props.insert("fs-type".into(), "ntfs".into());
        assert!(matches(&criteria, &props));
    }
}
