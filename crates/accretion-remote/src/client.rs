//! Gateway client implementing the service traits over HTTP/JSON.

use accretion_state::{
    CreateStackRequest, LayerPermission, LayerService, LayerVersion, NotificationSink,
    ObjectStore, ObjectVersion, ObjectVersionPage, PublishLayerRequest, ServiceError,
    ServiceResult, StackControlPlane, StackId, StackResource, StackStatus, UpdateStackRequest,
    WorkflowService,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::RemoteConfig;
use crate::error::{map_error, RemoteError};
use crate::wire::*;

const CLOUDFORMATION: &str = "cloudformation";
const S3: &str = "s3";
const LAMBDA: &str = "lambda";
const STATES: &str = "states";
const SNS: &str = "sns";

/// Control-plane gateway client.
///
/// One client serves every region; the region is part of each request path.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    config: RemoteConfig,
    http: reqwest::Client,
}

impl HttpControlPlane {
    pub fn new(config: RemoteConfig) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("accretion-remote/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;
        Ok(HttpControlPlane { config, http })
    }

    pub fn from_env() -> Result<Self, RemoteError> {
        Self::new(RemoteConfig::from_env())
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn request(&self, region: &str, service: &str, verb: &str) -> reqwest::RequestBuilder {
        let url = self.config.url_for(region, service, verb);
        debug!(%url, "gateway request");
        let builder = self.http.post(url);
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        verb: &str,
        subject: &str,
    ) -> ServiceResult<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| ServiceError::Transport(format!("{verb}: {e}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(map_error(verb, subject, status.as_u16(), &body))
    }

    async fn call<B, T>(
        &self,
        region: &str,
        service: &str,
        verb: &str,
        subject: &str,
        body: &B,
    ) -> ServiceResult<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let builder = self.request(region, service, verb).json(body);
        let response = self.send(builder, verb, subject).await?;
        let text = response
            .text()
            .await
            .map_err(|e| ServiceError::Transport(format!("{verb}: {e}")))?;
        let text = if text.trim().is_empty() { "null" } else { &text };
        serde_json::from_str(text)
            .map_err(|e| ServiceError::InvalidResponse(format!("{verb}: {e}")))
    }
}

#[async_trait]
impl StackControlPlane for HttpControlPlane {
    async fn create_stack(
        &self,
        region: &str,
        request: &CreateStackRequest,
    ) -> ServiceResult<StackId> {
        let input = StackTemplateInput {
            stack_name: &request.stack_name,
            template_body: &request.template_body,
            parameters: parameters(&request.parameters),
            capabilities: capabilities(request.allow_iam),
        };
        let output: CreateStackOutput = self
            .call(region, CLOUDFORMATION, "CreateStack", &request.stack_name, &input)
            .await?;
        Ok(StackId::new(output.stack_id))
    }

    async fn update_stack(&self, region: &str, request: &UpdateStackRequest) -> ServiceResult<()> {
        let input = StackTemplateInput {
            stack_name: request.stack_id.as_str(),
            template_body: &request.template_body,
            parameters: parameters(&request.parameters),
            capabilities: capabilities(request.allow_iam),
        };
        let _: serde_json::Value = self
            .call(
                region,
                CLOUDFORMATION,
                "UpdateStack",
                request.stack_id.as_str(),
                &input,
            )
            .await?;
        Ok(())
    }

    async fn delete_stack(&self, region: &str, stack_id: &StackId) -> ServiceResult<()> {
        let input = StackNameInput {
            stack_name: stack_id.as_str(),
        };
        let _: serde_json::Value = self
            .call(region, CLOUDFORMATION, "DeleteStack", stack_id.as_str(), &input)
            .await?;
        Ok(())
    }

    async fn describe_stack_status(
        &self,
        region: &str,
        stack_id: &StackId,
    ) -> ServiceResult<StackStatus> {
        let input = StackNameInput {
            stack_name: stack_id.as_str(),
        };
        let output: DescribeStacksOutput = self
            .call(region, CLOUDFORMATION, "DescribeStacks", stack_id.as_str(), &input)
            .await?;
        output
            .stacks
            .into_iter()
            .next()
            .map(|s| s.stack_status)
            .ok_or_else(|| ServiceError::StackNotFound {
                stack_id: stack_id.to_string(),
            })
    }

    async fn describe_resource(
        &self,
        region: &str,
        stack_id: &StackId,
        logical_id: &str,
    ) -> ServiceResult<String> {
        let input = DescribeStackResourceInput {
            stack_name: stack_id.as_str(),
            logical_resource_id: logical_id,
        };
        let output: DescribeStackResourceOutput = self
            .call(
                region,
                CLOUDFORMATION,
                "DescribeStackResource",
                stack_id.as_str(),
                &input,
            )
            .await?;
        Ok(output.stack_resource_detail.physical_resource_id)
    }

    async fn list_stack_resources(
        &self,
        region: &str,
        stack_id: &StackId,
    ) -> ServiceResult<Vec<StackResource>> {
        let mut resources = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let input = ListStackResourcesInput {
                stack_name: stack_id.as_str(),
                next_token: token.as_deref(),
            };
            let output: ListStackResourcesOutput = self
                .call(
                    region,
                    CLOUDFORMATION,
                    "ListStackResources",
                    stack_id.as_str(),
                    &input,
                )
                .await?;
            resources.extend(
                output
                    .stack_resource_summaries
                    .into_iter()
                    .map(|r| StackResource {
                        logical_id: r.logical_resource_id,
                        physical_id: r.physical_resource_id,
                        resource_type: r.resource_type,
                    }),
            );
            match output.next_token {
                Some(next) => token = Some(next),
                None => return Ok(resources),
            }
        }
    }
}

#[async_trait]
impl ObjectStore for HttpControlPlane {
    async fn list_object_versions(
        &self,
        region: &str,
        bucket: &str,
        continuation: Option<&str>,
    ) -> ServiceResult<ObjectVersionPage> {
        let input = ListObjectVersionsInput {
            bucket,
            continuation_token: continuation,
        };
        let output: ListObjectVersionsOutput = self
            .call(region, S3, "ListObjectVersions", bucket, &input)
            .await?;
        let next_token = output.next_continuation_token.clone();
        Ok(ObjectVersionPage {
            entries: output.into_entries(),
            next_token,
        })
    }

    async fn delete_objects(
        &self,
        region: &str,
        bucket: &str,
        objects: &[ObjectVersion],
    ) -> ServiceResult<()> {
        if objects.is_empty() {
            return Ok(());
        }
        let input = DeleteObjectsInput {
            bucket,
            delete: DeleteBatch {
                objects: objects
                    .iter()
                    .map(|o| ObjectIdentifier {
                        key: o.key.clone(),
                        version_id: o.version_id.clone(),
                    })
                    .collect(),
                quiet: true,
            },
        };
        let output: DeleteObjectsOutput = self
            .call(region, S3, "DeleteObjects", bucket, &input)
            .await?;
        match output.errors.first() {
            None => Ok(()),
            Some(first) => Err(ServiceError::rejected(
                "DeleteObjects",
                format!(
                    "{} of {} deletions failed, first {}: {}",
                    output.errors.len(),
                    objects.len(),
                    first.key,
                    first.message
                ),
            )),
        }
    }

    async fn head_object(&self, region: &str, bucket: &str, key: &str) -> ServiceResult<bool> {
        let input = ObjectKeyInput { bucket, key };
        let subject = format!("{bucket}/{key}");
        let builder = self.request(region, S3, "HeadObject").json(&input);
        match self.send(builder, "HeadObject", &subject).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_object(&self, region: &str, bucket: &str, key: &str) -> ServiceResult<Vec<u8>> {
        let input = ObjectKeyInput { bucket, key };
        let subject = format!("{bucket}/{key}");
        let builder = self.request(region, S3, "GetObject").json(&input);
        let response = self.send(builder, "GetObject", &subject).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ServiceError::Transport(format!("GetObject: {e}")))?;
        Ok(bytes.to_vec())
    }

    async fn put_object(
        &self,
        region: &str,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> ServiceResult<()> {
        let subject = format!("{bucket}/{key}");
        let builder = self
            .request(region, S3, "PutObject")
            .query(&[("Bucket", bucket), ("Key", key)])
            .body(body);
        self.send(builder, "PutObject", &subject).await?;
        Ok(())
    }
}

#[async_trait]
impl LayerService for HttpControlPlane {
    async fn publish_layer_version(
        &self,
        region: &str,
        request: &PublishLayerRequest,
    ) -> ServiceResult<LayerVersion> {
        let input = PublishLayerVersionInput {
            layer_name: &request.layer_name,
            description: &request.description,
            content: LayerContent {
                s3_bucket: &request.content.bucket,
                s3_key: &request.content.key,
            },
            compatible_runtimes: &request.compatible_runtimes,
        };
        let output: PublishLayerVersionOutput = self
            .call(
                region,
                LAMBDA,
                "PublishLayerVersion",
                &request.layer_name,
                &input,
            )
            .await?;
        Ok(LayerVersion {
            arn: output.layer_arn,
            version: output.version,
        })
    }

    async fn add_layer_permission(
        &self,
        region: &str,
        permission: &LayerPermission,
    ) -> ServiceResult<()> {
        let input = AddLayerVersionPermissionInput {
            layer_name: &permission.layer_arn,
            version_number: permission.version,
            statement_id: &permission.statement_id,
            action: &permission.action,
            principal: &permission.principal,
        };
        let _: serde_json::Value = self
            .call(
                region,
                LAMBDA,
                "AddLayerVersionPermission",
                &permission.statement_id,
                &input,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl WorkflowService for HttpControlPlane {
    async fn start_workflow(
        &self,
        region: &str,
        workflow_id: &str,
        execution_name: &str,
        input: &str,
    ) -> ServiceResult<String> {
        let body = StartExecutionInput {
            state_machine_arn: workflow_id,
            name: execution_name,
            input,
        };
        let output: StartExecutionOutput = self
            .call(region, STATES, "StartExecution", workflow_id, &body)
            .await?;
        Ok(output.execution_arn)
    }
}

/// Notification sink publishing to one topic.
#[derive(Debug, Clone)]
pub struct TopicSink {
    client: HttpControlPlane,
    region: String,
    topic_arn: String,
}

impl TopicSink {
    pub fn new(client: HttpControlPlane, region: &str, topic_arn: &str) -> Self {
        TopicSink {
            client,
            region: region.to_string(),
            topic_arn: topic_arn.to_string(),
        }
    }

    pub fn topic_arn(&self) -> &str {
        &self.topic_arn
    }
}

#[async_trait]
impl NotificationSink for TopicSink {
    async fn publish(&self, message: &serde_json::Value) -> ServiceResult<()> {
        let input = TopicPublishInput {
            topic_arn: &self.topic_arn,
            message: message.to_string(),
        };
        let _: serde_json::Value = self
            .client
            .call(&self.region, SNS, "Publish", &self.topic_arn, &input)
            .await?;
        Ok(())
    }
}
