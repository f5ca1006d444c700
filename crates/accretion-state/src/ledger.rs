//! Deployment ledger: regions mapped to the stacks provisioned in them.
//!
//! Persisted layout:
//!
//! ```json
//! { "Deployments": { "us-east-1": { "Core": "Accretion-…", "LayerBuilder": "Accretion-…" } } }
//! ```
//!
//! Unset slots are omitted from the persisted form, never written as `null`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::StateResult;

/// Named stack slot within a region.
///
/// Variants are listed in deployment order: `Core` provides the bucket the
/// builder stacks are deployed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StackSlot {
    Core,
    ArtifactBuilder,
    LayerBuilder,
}

impl StackSlot {
    /// Every slot, in deployment order.
    pub const ALL: [StackSlot; 3] = [
        StackSlot::Core,
        StackSlot::ArtifactBuilder,
        StackSlot::LayerBuilder,
    ];

    /// Slots deployed on top of `Core`.
    pub const BUILDERS: [StackSlot; 2] = [StackSlot::ArtifactBuilder, StackSlot::LayerBuilder];

    pub fn as_str(&self) -> &'static str {
        match self {
            StackSlot::Core => "Core",
            StackSlot::ArtifactBuilder => "ArtifactBuilder",
            StackSlot::LayerBuilder => "LayerBuilder",
        }
    }
}

impl fmt::Display for StackSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StackSlot {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StackSlot::ALL
            .into_iter()
            .find(|slot| slot.as_str() == s)
            .ok_or_else(|| StateError::Serialization(format!("unknown stack slot: {s}")))
    }
}

/// Opaque stack identifier assigned by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StackId(String);

impl StackId {
    pub fn new(id: impl Into<String>) -> Self {
        StackId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-region record: each slot is either unset or holds a stack identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionDeployment {
    stacks: BTreeMap<StackSlot, StackId>,
}

impl RegionDeployment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: StackSlot) -> Option<&StackId> {
        self.stacks.get(&slot)
    }

    pub fn is_set(&self, slot: StackSlot) -> bool {
        self.stacks.contains_key(&slot)
    }

    /// `true` when no slot holds a stack.
    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    /// Set slots in deployment order.
    pub fn stacks(&self) -> impl Iterator<Item = (StackSlot, &StackId)> {
        self.stacks.iter().map(|(slot, id)| (*slot, id))
    }

    /// Record the identifier of a newly created stack.
    ///
    /// A slot moves from unset to set once per stack lifetime. Assigning the
    /// identifier it already holds is a no-op; assigning a different one is
    /// a [`StateError::SlotConflict`].
    pub fn assign(&mut self, region: &str, slot: StackSlot, id: StackId) -> StateResult<()> {
        match self.stacks.get(&slot) {
            Some(existing) if *existing == id => Ok(()),
            Some(existing) => Err(StateError::SlotConflict {
                region: region.to_string(),
                slot: slot.to_string(),
                existing: existing.to_string(),
                requested: id.to_string(),
            }),
            None => {
                self.stacks.insert(slot, id);
                Ok(())
            }
        }
    }

    /// Unset a slot after its stack was destroyed. Returns the released id.
    pub fn release(&mut self, slot: StackSlot) -> Option<StackId> {
        self.stacks.remove(&slot)
    }
}

/// Durable mapping from region name to [`RegionDeployment`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentLedger {
    #[serde(rename = "Deployments", default)]
    deployments: BTreeMap<String, RegionDeployment>,
}

impl DeploymentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger with an empty record for each region.
    pub fn with_regions<I, S>(regions: I) -> StateResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ledger = Self::new();
        ledger.merge(regions)?;
        Ok(ledger)
    }

    /// Add missing regions with an empty record.
    ///
    /// Existing regions are never removed or overwritten. Returns the names
    /// of the regions that were added, sorted.
    pub fn merge<I, S>(&mut self, regions: I) -> StateResult<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let regions: Vec<String> = regions.into_iter().map(Into::into).collect();
        for region in &regions {
            validate_region_name(region)?;
        }

        let mut added = Vec::new();
        for region in regions {
            if !self.deployments.contains_key(&region) {
                self.deployments.insert(region.clone(), RegionDeployment::new());
                added.push(region);
            }
        }
        added.sort();
        added.dedup();
        Ok(added)
    }

    pub fn region(&self, region: &str) -> Option<&RegionDeployment> {
        self.deployments.get(region)
    }

    pub fn region_mut(&mut self, region: &str) -> Option<&mut RegionDeployment> {
        self.deployments.get_mut(region)
    }

    /// Replace the record of a registered region.
    pub fn replace_region(&mut self, region: &str, record: RegionDeployment) -> StateResult<()> {
        match self.deployments.get_mut(region) {
            Some(slot) => {
                *slot = record;
                Ok(())
            }
            None => Err(StateError::UnknownRegion(region.to_string())),
        }
    }

    pub fn regions(&self) -> impl Iterator<Item = &str> {
        self.deployments.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RegionDeployment)> {
        self.deployments.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.deployments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
    }

    /// Serialize the whole ledger as pretty-printed JSON.
    pub fn to_json_bytes(&self) -> StateResult<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Parse a persisted ledger. `location` is only used in error messages.
    pub fn from_json_bytes(bytes: &[u8], location: &str) -> StateResult<Self> {
        let ledger: DeploymentLedger =
            serde_json::from_slice(bytes).map_err(|e| StateError::Corrupt {
                location: location.to_string(),
                reason: e.to_string(),
            })?;
        for region in ledger.deployments.keys() {
            validate_region_name(region).map_err(|e| StateError::Corrupt {
                location: location.to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(ledger)
    }
}

/// Region names are non-empty lowercase ASCII words joined by `-`.
fn validate_region_name(region: &str) -> StateResult<()> {
    let valid = !region.is_empty()
        && !region.starts_with('-')
        && !region.ends_with('-')
        && region
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StateError::InvalidRegion(region.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_names_round_trip_through_from_str() {
        for slot in StackSlot::ALL {
            assert_eq!(slot.as_str().parse::<StackSlot>().unwrap(), slot);
        }
        assert!("Nope".parse::<StackSlot>().is_err());
    }

    #[test]
    fn assign_is_once_per_lifetime() {
        let mut record = RegionDeployment::new();
        record
            .assign("eu-west-1", StackSlot::Core, StackId::new("Accretion-1"))
            .unwrap();
        // Same id again is fine.
        record
            .assign("eu-west-1", StackSlot::Core, StackId::new("Accretion-1"))
            .unwrap();

        let err = record
            .assign("eu-west-1", StackSlot::Core, StackId::new("Accretion-2"))
            .unwrap_err();
        assert!(matches!(err, StateError::SlotConflict { .. }));
        assert_eq!(record.get(StackSlot::Core).unwrap().as_str(), "Accretion-1");
    }

    #[test]
    fn release_unsets_slot() {
        let mut record = RegionDeployment::new();
        record
            .assign("eu-west-1", StackSlot::LayerBuilder, StackId::new("Accretion-9"))
            .unwrap();
        assert_eq!(
            record.release(StackSlot::LayerBuilder),
            Some(StackId::new("Accretion-9"))
        );
        assert!(!record.is_set(StackSlot::LayerBuilder));
        assert_eq!(record.release(StackSlot::LayerBuilder), None);
    }

    #[test]
    fn merge_never_overwrites_existing_regions() {
        let mut ledger = DeploymentLedger::with_regions(["us-east-1"]).unwrap();
        ledger
            .region_mut("us-east-1")
            .unwrap()
            .assign("us-east-1", StackSlot::Core, StackId::new("Accretion-core"))
            .unwrap();

        let added = ledger.merge(["us-east-1", "us-west-2", "us-west-2"]).unwrap();
        assert_eq!(added, vec!["us-west-2".to_string()]);
        assert_eq!(ledger.len(), 2);
        assert!(ledger.region("us-east-1").unwrap().is_set(StackSlot::Core));
        assert!(ledger.region("us-west-2").unwrap().is_empty());

        // Idempotent.
        assert!(ledger.merge(["us-west-2"]).unwrap().is_empty());
    }

    #[test]
    fn merge_rejects_malformed_region_names() {
        let mut ledger = DeploymentLedger::new();
        let err = ledger.merge(["us-east-1", "US EAST"]).unwrap_err();
        assert!(matches!(err, StateError::InvalidRegion(r) if r == "US EAST"));
        // Nothing was added from the rejected batch.
        assert!(ledger.is_empty());
    }

    #[test]
    fn unset_slots_are_omitted_from_json() {
        let mut ledger = DeploymentLedger::with_regions(["ap-south-1", "sa-east-1"]).unwrap();
        ledger
            .region_mut("ap-south-1")
            .unwrap()
            .assign("ap-south-1", StackSlot::Core, StackId::new("Accretion-x"))
            .unwrap();

        let bytes = ledger.to_json_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "Deployments": {
                    "ap-south-1": { "Core": "Accretion-x" },
                    "sa-east-1": {}
                }
            })
        );
        assert!(!String::from_utf8(bytes).unwrap().contains("null"));
    }

    #[test]
    fn unknown_slot_in_file_is_corrupt() {
        let raw = br#"{ "Deployments": { "us-east-1": { "Mystery": "x" } } }"#;
        let err = DeploymentLedger::from_json_bytes(raw, "ledger.json").unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));
    }

    #[test]
    fn null_slot_in_file_is_corrupt() {
        let raw = br#"{ "Deployments": { "us-east-1": { "Core": null } } }"#;
        let err = DeploymentLedger::from_json_bytes(raw, "ledger.json").unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));
    }
}
