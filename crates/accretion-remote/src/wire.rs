//! Gateway request and response bodies.
//!
//! Field names follow the control plane's own PascalCase spelling.

use accretion_state::{ObjectVersion, StackParameters, StackStatus};
use serde::{Deserialize, Serialize};

pub(crate) const CAPABILITY_IAM: &str = "CAPABILITY_IAM";

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct Parameter {
    pub parameter_key: String,
    pub parameter_value: String,
}

pub(crate) fn parameters(params: &StackParameters) -> Vec<Parameter> {
    params
        .iter()
        .map(|(k, v)| Parameter {
            parameter_key: k.to_string(),
            parameter_value: v.to_string(),
        })
        .collect()
}

pub(crate) fn capabilities(allow_iam: bool) -> Vec<String> {
    if allow_iam {
        vec![CAPABILITY_IAM.to_string()]
    } else {
        Vec::new()
    }
}

// --- stacks ---------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct StackTemplateInput<'a> {
    pub stack_name: &'a str,
    pub template_body: &'a str,
    pub parameters: Vec<Parameter>,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct StackNameInput<'a> {
    pub stack_name: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct CreateStackOutput {
    pub stack_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeStacksOutput {
    #[serde(default)]
    pub stacks: Vec<StackSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct StackSummary {
    pub stack_status: StackStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeStackResourceInput<'a> {
    pub stack_name: &'a str,
    pub logical_resource_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeStackResourceOutput {
    pub stack_resource_detail: ResourceDetail,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ResourceDetail {
    pub physical_resource_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ListStackResourcesInput<'a> {
    pub stack_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ListStackResourcesOutput {
    #[serde(default)]
    pub stack_resource_summaries: Vec<ResourceSummary>,
    pub next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ResourceSummary {
    pub logical_resource_id: String,
    #[serde(default)]
    pub physical_resource_id: String,
    pub resource_type: String,
}

// --- objects --------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ListObjectVersionsInput<'a> {
    pub bucket: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<&'a str>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ObjectIdentifier {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ListObjectVersionsOutput {
    #[serde(default)]
    pub versions: Vec<ObjectIdentifier>,
    #[serde(default)]
    pub delete_markers: Vec<ObjectIdentifier>,
    pub next_continuation_token: Option<String>,
}

impl ListObjectVersionsOutput {
    pub fn into_entries(self) -> Vec<ObjectVersion> {
        let versions = self.versions.into_iter().map(|v| ObjectVersion {
            key: v.key,
            version_id: v.version_id,
            is_delete_marker: false,
        });
        let markers = self.delete_markers.into_iter().map(|v| ObjectVersion {
            key: v.key,
            version_id: v.version_id,
            is_delete_marker: true,
        });
        versions.chain(markers).collect()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DeleteObjectsInput<'a> {
    pub bucket: &'a str,
    pub delete: DeleteBatch,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DeleteBatch {
    pub objects: Vec<ObjectIdentifier>,
    pub quiet: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DeleteObjectsOutput {
    #[serde(default)]
    pub errors: Vec<DeleteError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DeleteError {
    pub key: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ObjectKeyInput<'a> {
    pub bucket: &'a str,
    pub key: &'a str,
}

// --- layers, workflows, topics --------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct PublishLayerVersionInput<'a> {
    pub layer_name: &'a str,
    pub description: &'a str,
    pub content: LayerContent<'a>,
    pub compatible_runtimes: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct LayerContent<'a> {
    pub s3_bucket: &'a str,
    pub s3_key: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct PublishLayerVersionOutput {
    pub layer_arn: String,
    pub version: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AddLayerVersionPermissionInput<'a> {
    pub layer_name: &'a str,
    pub version_number: u64,
    pub statement_id: &'a str,
    pub action: &'a str,
    pub principal: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct StartExecutionInput<'a> {
    pub state_machine_arn: &'a str,
    pub name: &'a str,
    pub input: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct StartExecutionOutput {
    pub execution_arn: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct TopicPublishInput<'a> {
    pub topic_arn: &'a str,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_input_carries_parameters_and_capabilities() {
        let params = StackParameters::new()
            .with("ArtifactBucketName", "bucket")
            .with("WorkersS3Key", "accretion/workers/w.zip");
        let input = StackTemplateInput {
            stack_name: "Accretion-1",
            template_body: "{}",
            parameters: parameters(&params),
            capabilities: capabilities(true),
        };
        let value = serde_json::to_value(&input).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "StackName": "Accretion-1",
                "TemplateBody": "{}",
                "Parameters": [
                    {"ParameterKey": "ArtifactBucketName", "ParameterValue": "bucket"},
                    {"ParameterKey": "WorkersS3Key", "ParameterValue": "accretion/workers/w.zip"}
                ],
                "Capabilities": ["CAPABILITY_IAM"]
            })
        );
    }

    #[test]
    fn version_listing_merges_markers() {
        let raw = r#"{
            "Versions": [{"Key": "a", "VersionId": "1"}],
            "DeleteMarkers": [{"Key": "a", "VersionId": "2"}],
            "NextContinuationToken": null
        }"#;
        let output: ListObjectVersionsOutput = serde_json::from_str(raw).unwrap();
        let entries = output.into_entries();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].is_delete_marker);
        assert!(entries[1].is_delete_marker);
    }
}
