//! Deterministic resource names.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/// Prefix of the tag that identifies an instance and its port.
pub const INSTANCE_NAME_TAG: &str = "InstanceName";

/// Hex characters of the hash kept in an instance name.
const HASH_WIDTH: usize = 6;
const HASH_BYTES: usize = HASH_WIDTH / 2;

// Lower-case metadata keys only allow this set.
static METADATA_KEY_DISALLOWED: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new("[^a-zA-Z0-9_:. -]").ok());

fn dashed(name: &str) -> String {
    name.to_lowercase().replace(['_', '.'], "-")
}

/// `{group}-{hash}` where the hash covers every input.
///
/// Bumping either generation yields a new name, which forces the instance to
/// be replaced.
#[must_use]
pub fn make_instance_name(
    index: u32,
    group: &str,
    group_generation: i64,
    cluster_generation: i64,
) -> String {
    let digest = Sha256::digest(format!(
        "{index}-{group}-{group_generation}-{cluster_generation}"
    ));
    let mut hash = String::with_capacity(HASH_WIDTH);
    for byte in digest.iter().take(HASH_BYTES) {
        let _ = write!(hash, "{byte:02x}");
    }
    format!("{}-{hash}", dashed(group))
}

/// Human-readable instance name, `{group}-{index}-{cluster}` with dots and
/// underscores dashed.
#[must_use]
pub fn full_instance_name(index: u32, group: &str, cluster: &str) -> String {
    dashed(&format!("{group}-{index}.{cluster}"))
}

#[must_use]
pub fn instance_name_tag(full_name: &str) -> String {
    format!("{INSTANCE_NAME_TAG}:{full_name}")
}

#[must_use]
pub fn sanitize_metadata_key(key: &str) -> String {
    METADATA_KEY_DISALLOWED.as_ref().map_or_else(
        || key.to_lowercase(),
        |disallowed| disallowed.replace_all(key, "_").to_lowercase(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_instance_name_shape() {
        let name = make_instance_name(1, "Master_Zone.A", 1, 3);
        assert!(name.starts_with("master-zone-a-"), "unexpected name {name}");
        let hash = name.trim_start_matches("master-zone-a-");
        assert_eq!(hash.len(), HASH_WIDTH);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_known_hash() {
        let digest = Sha256::digest("1-nodes-0-0");
        let expected: String = digest.iter().take(3).map(|b| format!("{b:02x}")).collect();
        assert_eq!(make_instance_name(1, "nodes", 0, 0), format!("nodes-{expected}"));
    }

    #[test]
    fn test_full_name_and_tag() {
        let full = full_instance_name(2, "nodes_a", "demo.example.com");
        assert_eq!(full, "nodes-a-2-demo-example-com");
        assert_eq!(instance_name_tag(&full), "InstanceName:nodes-a-2-demo-example-com");
    }

    #[test]
    fn test_sanitize_metadata_key() {
        assert_eq!(
            sanitize_metadata_key("k8s.io/Role=Master"),
            "k8s.io_role_master"
        );
        assert_eq!(sanitize_metadata_key("Team Name:ok"), "team name:ok");
    }

    proptest! {
        #[test]
        fn prop_instance_name_is_pure(
            index in 1u32..1000,
            group in "[a-zA-Z][a-zA-Z0-9_.-]{0,20}",
            ig_gen in 0i64..100,
            cluster_gen in 0i64..100,
        ) {
            let first = make_instance_name(index, &group, ig_gen, cluster_gen);
            prop_assert_eq!(&first, &make_instance_name(index, &group, ig_gen, cluster_gen));
            prop_assert_ne!(&first, &make_instance_name(index, &group, ig_gen + 1, cluster_gen));
            prop_assert_ne!(&first, &make_instance_name(index, &group, ig_gen, cluster_gen + 1));
            prop_assert_ne!(&first, &make_instance_name(index + 1, &group, ig_gen, cluster_gen));
        }

        #[test]
        fn prop_sanitized_keys_only_use_allowed_characters(key in ".{0,40}") {
            let sanitized = sanitize_metadata_key(&key);
            prop_assert!(METADATA_KEY_DISALLOWED.as_ref().is_some_and(|re| !re.is_match(&sanitized)));
        }
    }
}
