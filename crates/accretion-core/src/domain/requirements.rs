//! Layer requests and requirement parsing.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::{AccretionError, Result};

/// Maximum project name length; layer names add a runtime suffix on top.
pub const MAX_PROJECT_NAME_LENGTH: usize = 70;

const PROJECT_NAME_PATTERN: &str = r"^[A-Za-z0-9_-]+$";
static PROJECT_NAME: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
const SUPPORTED_LANGUAGES: &[&str] = &["python"];

/// One requested dependency: a name plus version/extras/marker details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Requirement {
    pub name: String,
    #[serde(default)]
    pub details: String,
}

impl Requirement {
    pub fn new(name: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            details: details.into(),
        }
    }

    /// Split a `requirements.txt` line at the first version, extras or
    /// marker character.
    pub fn from_line(line: &str) -> Self {
        let line = line.trim();
        let split = line
            .find(|c: char| "[<>=!~;@".contains(c) || c.is_whitespace())
            .unwrap_or(line.len());
        let (name, details) = line.split_at(split);
        Self::new(name.trim(), details.trim())
    }

    /// Back to `requirements.txt` form.
    pub fn to_line(&self) -> String {
        format!("{}{}", self.name, self.details)
    }
}

/// Requirements as submitted, tagged by input format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Type", content = "Requirements")]
pub enum RequirementsInput {
    /// Already split into name and details.
    #[serde(rename = "ready", alias = "accretion")]
    Ready(Vec<Requirement>),
    /// Raw `requirements.txt` contents.
    #[serde(rename = "requirements.txt")]
    RequirementsTxt(String),
}

impl RequirementsInput {
    pub fn parse(&self) -> Vec<Requirement> {
        match self {
            RequirementsInput::Ready(requirements) => requirements.clone(),
            RequirementsInput::RequirementsTxt(text) => parse_requirements_txt(text),
        }
    }
}

/// Parse `requirements.txt` contents. Blank lines and comments are skipped.
pub fn parse_requirements_txt(text: &str) -> Vec<Requirement> {
    text.lines()
        .map(|line| line.split_once('#').map_or(line, |(before, _)| before))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(Requirement::from_line)
        .collect()
}

/// A request to build and publish a layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LayerRequest {
    pub name: String,
    pub language: String,
    pub requirements: RequirementsInput,
}

/// A layer request after validation and normalisation; this is what the
/// artifact-builder workflow receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ValidatedLayerRequest {
    pub name: String,
    pub language: String,
    pub requirements: Vec<Requirement>,
}

impl LayerRequest {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| AccretionError::InvalidRequest(format!("malformed layer request: {e}")))
    }

    pub fn validate(&self) -> Result<ValidatedLayerRequest> {
        let pattern = PROJECT_NAME
            .get_or_init(|| Regex::new(PROJECT_NAME_PATTERN))
            .as_ref()
            .map_err(|e| AccretionError::Internal(format!("project name pattern: {e}")))?;
        if !pattern.is_match(&self.name) {
            return Err(AccretionError::InvalidRequest(format!(
                "project name must be a valid layer name: {:?}",
                self.name
            )));
        }
        if self.name.len() > MAX_PROJECT_NAME_LENGTH {
            return Err(AccretionError::InvalidRequest(format!(
                "project name must not be longer than {MAX_PROJECT_NAME_LENGTH} characters"
            )));
        }

        let language = self.language.to_lowercase();
        if !SUPPORTED_LANGUAGES.contains(&language.as_str()) {
            return Err(AccretionError::InvalidRequest(format!(
                "unsupported language: {language:?}"
            )));
        }

        let requirements = self.requirements.parse();
        if let Some(bad) = requirements.iter().find(|r| r.name.is_empty()) {
            return Err(AccretionError::InvalidRequest(format!(
                "invalid requirement: {:?}",
                bad.to_line()
            )));
        }

        Ok(ValidatedLayerRequest {
            name: self.name.clone(),
            language,
            requirements,
        })
    }
}
