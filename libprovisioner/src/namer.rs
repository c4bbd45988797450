//! Deterministic backing-directory names.
//!
//! A volume's directory is its grouping keys followed by its name, joined
//! with [`SEPARATOR`]:
//!
//! ```text
//! <key 0>-<key 1>-...-<key n-1>-<name>
//! ```
//!
//! Decoding splits at the first `n` separators, so the mapping is reversible
//! only while no grouping key contains the separator.  [`PathNamer`] enforces
//! that as a validation rule rather than escaping: the name itself is the
//! last field and may contain separators freely.

use std::collections::BTreeMap;

use crate::error::ProvisionerError;
use crate::types::{GroupingKeys, VolumeRequest};

/// Field separator in directory names.
pub const SEPARATOR: char = '-';

/// Prefix given to a directory when its volume is archived.
pub const ARCHIVE_PREFIX: &str = "archived-";

/// Maps grouping keys + volume name to a directory name and back.
#[derive(Debug, Clone)]
pub struct PathNamer {
    /// Descriptor label keys for each grouping field, in field order.
    label_keys: Vec<String>,
}

impl PathNamer {
    pub fn new<I, S>(label_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            label_keys: label_keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of grouping keys every name carries.
    pub fn arity(&self) -> usize {
        self.label_keys.len()
    }

    pub fn label_keys(&self) -> &[String] {
        &self.label_keys
    }

    /// Directory name backing `req`.
    pub fn volume_dir_name(&self, req: &VolumeRequest) -> Result<String, ProvisionerError> {
        self.dir_name(&req.grouping, &req.name)
    }

    /// Join `grouping` and `name` into a directory name, validating both.
    pub fn dir_name(&self, grouping: &GroupingKeys, name: &str) -> Result<String, ProvisionerError> {
        self.check_arity(grouping)?;
        for key in grouping.iter() {
            validate_grouping_key(key)?;
        }
        validate_volume_name(name)?;

        let mut dir = String::new();
        for key in grouping.iter() {
            dir.push_str(key);
            dir.push(SEPARATOR);
        }
        dir.push_str(name);

        if dir.starts_with(ARCHIVE_PREFIX) {
            return Err(ProvisionerError::invalid_name(
                "directory name",
                dir,
                format!("must not start with the reserved prefix {ARCHIVE_PREFIX:?}"),
            ));
        }
        Ok(dir)
    }

    /// Recover the grouping keys and volume name from a directory name.
    pub fn parse_grouping_keys(
        &self,
        dir_name: &str,
    ) -> Result<(GroupingKeys, String), ProvisionerError> {
        let mut fields: Vec<&str> = dir_name.splitn(self.arity() + 1, SEPARATOR).collect();
        if fields.len() != self.arity() + 1 {
            return Err(ProvisionerError::invalid_name(
                "directory name",
                dir_name,
                format!("expected {} grouping keys before the name", self.arity()),
            ));
        }

        let name = fields.pop().unwrap_or_default();
        validate_volume_name(name).map_err(|_| {
            ProvisionerError::invalid_name("directory name", dir_name, "volume name field is invalid")
        })?;
        Ok((GroupingKeys::new(fields), name.to_owned()))
    }

    /// Descriptor labels recording `grouping`.
    pub fn labels(&self, grouping: &GroupingKeys) -> BTreeMap<String, String> {
        self.label_keys
            .iter()
            .cloned()
            .zip(grouping.iter().map(str::to_owned))
            .collect()
    }

    /// Grouping keys recorded in a descriptor's labels.
    pub fn grouping_from_labels(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<GroupingKeys, ProvisionerError> {
        let keys = self
            .label_keys
            .iter()
            .map(|key| {
                labels.get(key).cloned().ok_or_else(|| {
                    ProvisionerError::InvalidDescriptor(format!("missing grouping label {key:?}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(GroupingKeys(keys))
    }

    fn check_arity(&self, grouping: &GroupingKeys) -> Result<(), ProvisionerError> {
        if grouping.len() != self.arity() {
            return Err(ProvisionerError::invalid_name(
                "grouping",
                grouping.0.join(","),
                format!("expected {} grouping keys, got {}", self.arity(), grouping.len()),
            ));
        }
        Ok(())
    }
}

fn validate_grouping_key(key: &str) -> Result<(), ProvisionerError> {
    if key.contains(SEPARATOR) {
        return Err(ProvisionerError::invalid_name(
            "grouping key",
            key,
            format!("must not contain {SEPARATOR:?}"),
        ));
    }
    if key.contains(['/', '\0']) {
        return Err(ProvisionerError::invalid_name(
            "grouping key",
            key,
            "must not contain '/' or NUL",
        ));
    }
    Ok(())
}

fn validate_volume_name(name: &str) -> Result<(), ProvisionerError> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(ProvisionerError::invalid_name(
            "volume name",
            name,
            "must be a non-empty path component",
        ));
    }
    if name.contains(['/', '\0']) {
        return Err(ProvisionerError::invalid_name(
            "volume name",
            name,
            "must not contain '/' or NUL",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn namer() -> PathNamer {
        PathNamer::new(["tenant", "stack"])
    }

    #[test]
    fn joins_grouping_and_name() {
        let req = VolumeRequest {
            name: "pv-1".into(),
            grouping: GroupingKeys::new(["acme", "web"]),
            ..Default::default()
        };
        assert_eq!(namer().volume_dir_name(&req).unwrap(), "acme-web-pv-1");
    }

    #[test]
    fn parses_name_containing_separator() {
        let (grouping, name) = namer().parse_grouping_keys("acme-web-pv-1").unwrap();
        assert_eq!(grouping, GroupingKeys::new(["acme", "web"]));
        assert_eq!(name, "pv-1");
    }

    #[test]
    fn empty_grouping_keys_roundtrip() {
        let dir = namer().dir_name(&GroupingKeys::new(["", ""]), "pv").unwrap();
        assert_eq!(dir, "--pv");
        let (grouping, name) = namer().parse_grouping_keys(&dir).unwrap();
        assert_eq!(grouping, GroupingKeys::new(["", ""]));
        assert_eq!(name, "pv");
    }

    #[test]
    fn zero_arity_uses_name_only() {
        let namer = PathNamer::new(Vec::<String>::new());
        assert_eq!(namer.dir_name(&GroupingKeys::default(), "pv-1").unwrap(), "pv-1");
        let (grouping, name) = namer.parse_grouping_keys("pv-1").unwrap();
        assert!(grouping.is_empty());
        assert_eq!(name, "pv-1");
    }

    #[test]
    fn rejects_separator_in_grouping_key() {
        let err = namer()
            .dir_name(&GroupingKeys::new(["ac-me", "web"]), "pv")
            .unwrap_err();
        assert!(matches!(err, ProvisionerError::InvalidName { ref field, .. } if field == "grouping key"));
    }

    #[test]
    fn rejects_wrong_arity() {
        let err = namer().dir_name(&GroupingKeys::new(["acme"]), "pv").unwrap_err();
        assert!(matches!(err, ProvisionerError::InvalidName { ref field, .. } if field == "grouping"));
    }

    #[test]
    fn rejects_path_like_names() {
        for bad in ["", ".", "..", "a/b", "nul\0"] {
            assert!(
                namer().dir_name(&GroupingKeys::new(["acme", "web"]), bad).is_err(),
                "{bad:?} should be rejected"
            );
        }
        assert!(namer().dir_name(&GroupingKeys::new(["a/b", "web"]), "pv").is_err());
    }

    #[test]
    fn rejects_archive_prefix() {
        let err = namer()
            .dir_name(&GroupingKeys::new(["archived", "web"]), "pv")
            .unwrap_err();
        assert!(matches!(err, ProvisionerError::InvalidName { ref field, .. } if field == "directory name"));
    }

    #[test]
    fn parse_rejects_too_few_fields() {
        assert!(namer().parse_grouping_keys("acme-pv").is_err());
        assert!(namer().parse_grouping_keys("acme-web-").is_err());
    }

    #[test]
    fn labels_roundtrip() {
        let grouping = GroupingKeys::new(["acme", "web"]);
        let labels = namer().labels(&grouping);
        assert_eq!(labels.get("tenant").map(String::as_str), Some("acme"));
        assert_eq!(namer().grouping_from_labels(&labels).unwrap(), grouping);
    }

    #[test]
    fn missing_label_is_invalid_descriptor() {
        let labels = BTreeMap::from([("tenant".to_owned(), "acme".to_owned())]);
        let err = namer().grouping_from_labels(&labels).unwrap_err();
        assert!(matches!(err, ProvisionerError::InvalidDescriptor(_)));
    }

    fn grouping_key() -> impl Strategy<Value = String> {
        "[a-z0-9_.]{0,8}"
    }

    fn volume_name() -> impl Strategy<Value = String> {
        "[a-z0-9][a-z0-9.-]{0,15}"
    }

    proptest! {
        #[test]
        fn parse_inverts_dir_name(
            tenant in grouping_key(),
            stack in grouping_key(),
            name in volume_name(),
        ) {
            prop_assume!(tenant != "archived");
            let grouping = GroupingKeys::new([tenant, stack]);
            let dir = namer().dir_name(&grouping, &name).unwrap();
            let (parsed, parsed_name) = namer().parse_grouping_keys(&dir).unwrap();
            prop_assert_eq!(parsed, grouping);
            prop_assert_eq!(parsed_name, name);
        }

        #[test]
        fn distinct_tuples_get_distinct_names(
            a in (grouping_key(), grouping_key(), volume_name()),
            b in (grouping_key(), grouping_key(), volume_name()),
        ) {
            prop_assume!(a != b);
            prop_assume!(a.0 != "archived" && b.0 != "archived");
            let dir_a = namer().dir_name(&GroupingKeys::new([a.0.clone(), a.1.clone()]), &a.2).unwrap();
            let dir_b = namer().dir_name(&GroupingKeys::new([b.0.clone(), b.1.clone()]), &b.2).unwrap();
            prop_assert_ne!(dir_a, dir_b);
        }

        #[test]
        fn separator_in_any_grouping_key_is_rejected(
            head in "[a-z]{0,4}",
            tail in "[a-z]{0,4}",
            name in volume_name(),
        ) {
            let bad = format!("{head}-{tail}");
            prop_assert!(namer().dir_name(&GroupingKeys::new([bad.clone(), "web".into()]), &name).is_err());
            prop_assert!(namer().dir_name(&GroupingKeys::new(["acme".into(), bad]), &name).is_err());
        }
    }
}
