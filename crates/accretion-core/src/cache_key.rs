//! Artifact cache key: the content address of a built dependency set.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{AccretionError, PackageVersion};

const INSTALLED_MARKER: &[u8] = b"===INSTALLED===";
const RUNTIMES_MARKER: &[u8] = b"===RUNTIMES===";

/// SHA-256 over the installed package set and the target runtime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ArtifactCacheKey([u8; 32]);

impl ArtifactCacheKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ArtifactCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ArtifactCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ArtifactCacheKey({})",
            self.to_hex().chars().take(12).collect::<String>()
        )
    }
}

impl FromStr for ArtifactCacheKey {
    type Err = AccretionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AccretionError::InvalidRequest(format!("invalid cache key: {s:?}"));
        let bytes = hex::decode(s).map_err(|_| invalid())?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| invalid())?;
        Ok(Self(arr))
    }
}

impl From<ArtifactCacheKey> for String {
    fn from(key: ArtifactCacheKey) -> Self {
        key.to_hex()
    }
}

impl TryFrom<String> for ArtifactCacheKey {
    type Error = AccretionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Compute the cache key for an installed package set on `runtime`.
///
/// Order-independent over `installed`: pairs are sorted and deduplicated,
/// then each is hashed as `name NUL version LF` so no two distinct sets
/// share a byte stream. With
/// `force_new` a fresh 32-byte random salt is mixed in, so the key has the
/// same shape as the unsalted one but never equals it in practice.
pub fn compute_key(installed: &[PackageVersion], runtime: &str, force_new: bool) -> ArtifactCacheKey {
    let mut packages: Vec<&PackageVersion> = installed.iter().collect();
    packages.sort();
    packages.dedup();

    let mut hasher = Sha256::new();
    hasher.update(INSTALLED_MARKER);
    for package in packages {
        hasher.update(package.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(package.version.as_bytes());
        hasher.update([b'\n']);
    }
    hasher.update(RUNTIMES_MARKER);
    hasher.update(runtime.as_bytes());
    if force_new {
        let salt: [u8; 32] = rand::random();
        hasher.update(salt);
    }

    ArtifactCacheKey(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<PackageVersion> {
        vec![
            PackageVersion::new("boto3", "1.9.169"),
            PackageVersion::new("attrs", "19.1.0"),
            PackageVersion::new("Click", "7.0"),
        ]
    }

    #[test]
    fn known_input_produces_known_key() {
        let key = compute_key(&sample(), "python3.7", false);
        assert_eq!(
            key.to_hex(),
            "1bc5ba4efa0d961968ef174f757fea03629a0fa1fd8817ce5d5a1ee182270c44"
        );
    }

    #[test]
    fn duplicates_do_not_change_the_key() {
        let mut doubled = sample();
        doubled.push(PackageVersion::new("attrs", "19.1.0"));
        assert_eq!(
            compute_key(&doubled, "python3.7", false),
            compute_key(&sample(), "python3.7", false)
        );
    }

    #[test]
    fn package_boundaries_are_part_of_the_key() {
        let split = vec![PackageVersion::new("a", "1"), PackageVersion::new("b", "2")];
        let merged = vec![PackageVersion::new("a-1b", "2")];
        assert_ne!(
            compute_key(&split, "python3.7", false),
            compute_key(&merged, "python3.7", false)
        );
    }

    #[test]
    fn runtime_is_part_of_the_key() {
        assert_ne!(
            compute_key(&sample(), "python3.7", false),
            compute_key(&sample(), "python3.6", false)
        );
    }

    #[test]
    fn hex_round_trip_and_serde_as_string() {
        let key = compute_key(&sample(), "python3.7", false);
        let parsed: ArtifactCacheKey = key.to_hex().parse().unwrap();
        assert_eq!(parsed, key);

        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key.to_hex()));
        assert!("abc".parse::<ArtifactCacheKey>().is_err());
        assert!("zz".repeat(32).parse::<ArtifactCacheKey>().is_err());
    }
}
