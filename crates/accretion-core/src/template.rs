//! Stack template sources.
//!
//! Templates are opaque documents: the core reads them and passes them to
//! the control plane without inspecting their contents.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use accretion_state::StackSlot;

use crate::domain::{AccretionError, Result};

/// Returns the template document for a slot.
pub trait TemplateProvider: Send + Sync {
    fn template(&self, slot: StackSlot) -> Result<String>;
}

/// Templates read from `<dir>/<Slot>.json`, e.g. `templates/Core.json`.
#[derive(Debug, Clone)]
pub struct DirectoryTemplates {
    dir: PathBuf,
}

impl DirectoryTemplates {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, slot: StackSlot) -> PathBuf {
        self.dir.join(format!("{}.json", slot.as_str()))
    }
}

impl TemplateProvider for DirectoryTemplates {
    fn template(&self, slot: StackSlot) -> Result<String> {
        let path = self.path_for(slot);
        std::fs::read_to_string(&path).map_err(|e| {
            AccretionError::Configuration(format!(
                "cannot read {slot} template {}: {e}",
                path.display()
            ))
        })
    }
}

/// In-memory templates.
#[derive(Debug, Clone, Default)]
pub struct StaticTemplates {
    bodies: HashMap<StackSlot, String>,
}

impl StaticTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, slot: StackSlot, body: impl Into<String>) -> Self {
        self.bodies.insert(slot, body.into());
        self
    }
}

impl TemplateProvider for StaticTemplates {
    fn template(&self, slot: StackSlot) -> Result<String> {
        self.bodies
            .get(&slot)
            .cloned()
            .ok_or_else(|| AccretionError::Configuration(format!("no template for {slot}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_templates_are_named_after_slots() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Core.json"), "{\"Resources\": {}}").unwrap();

        let templates = DirectoryTemplates::new(dir.path());
        assert_eq!(templates.template(StackSlot::Core).unwrap(), "{\"Resources\": {}}");

        let err = templates.template(StackSlot::LayerBuilder).unwrap_err();
        assert!(matches!(err, AccretionError::Configuration(msg) if msg.contains("LayerBuilder")));
    }

    #[test]
    fn static_templates_report_missing_slots() {
        let templates = StaticTemplates::new().with(StackSlot::Core, "core");
        assert_eq!(templates.template(StackSlot::Core).unwrap(), "core");
        assert!(templates.template(StackSlot::ArtifactBuilder).is_err());
    }
}
