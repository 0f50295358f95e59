//! Object-name rules shared by the write cache, the read cache and
//! flush-by-inode.
//!
//! A staged object is named `"{inode}-{suffix}"`; the inode is everything
//! before the first `-`. With a nonzero `object_prefix` the staged file
//! lives under a two-hex-digit fan-out directory derived from the name, so
//! large caches do not pile every file into one directory.

use std::path::PathBuf;

use sha2::{Digest, Sha256};

/// Whether `name` belongs to `inode` under the shared naming rule.
pub fn valid_name_of_inode(inode: &str, name: &str) -> bool {
    !inode.is_empty() && name.split('-').next() == Some(inode)
}

/// The path of `name` relative to the staging directory.
pub fn path_by_obj_name(name: &str, object_prefix: u32) -> PathBuf {
    if object_prefix == 0 {
        return PathBuf::from(name);
    }
    let digest = Sha256::digest(name.as_bytes());
    PathBuf::from(hex::encode(&digest[..1])).join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inode_is_the_leading_segment() {
        assert!(valid_name_of_inode("100", "100-0-1"));
        assert!(valid_name_of_inode("100", "100-17"));
        assert!(!valid_name_of_inode("100", "1001-0"));
        assert!(!valid_name_of_inode("100", "99-100"));
        assert!(!valid_name_of_inode("", "-0"));
    }

    #[test]
    fn test_prefix_zero_keeps_names_flat() {
        assert_eq!(path_by_obj_name("100-0", 0), PathBuf::from("100-0"));
    }

    #[test]
    fn test_prefixed_names_fan_out_deterministically() {
        let a = path_by_obj_name("100-0", 1);
        let b = path_by_obj_name("100-0", 1);
        assert_eq!(a, b);
        assert_eq!(a.components().count(), 2);
        assert!(a.ends_with("100-0"));
    }
}
