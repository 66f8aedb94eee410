/*!
Amazon S3 object store client.

This module uploads batches to S3 using the official AWS SDK.
*/

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, error, info};

use super::{ObjectStoreClient, PutRequest, Visibility};
use crate::{Result, SpoolError};

/// Amazon S3 object store
///
/// # Authentication
/// The client uses the standard AWS credential provider chain:
/// 1. Environment variables (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_SESSION_TOKEN)
/// 2. AWS credentials file (~/.aws/credentials)
/// 3. IAM roles for EC2 instances
/// 4. ECS task roles
///
/// Request timeouts come from the SDK configuration.
///
/// # Example
/// ```rust,no_run
/// use spool_core::store::S3ObjectStore;
///
/// # async fn run() -> spool_core::Result<()> {
/// let store = S3ObjectStore::new("my-log-bucket".to_string(), Some("eu-west-1".to_string())).await?;
/// assert_eq!(store.bucket(), "my-log-bucket");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Create a client for `bucket`, loading AWS configuration from the environment
    ///
    /// # Errors
    /// Returns an error if no AWS credentials can be resolved.
    pub async fn new(bucket: String, region: Option<String>) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let sdk_config = loader.load().await;

        if sdk_config.credentials_provider().is_none() {
            return Err(SpoolError::config(
                "AWS credentials not found. Please set AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, and AWS_REGION environment variables",
            ));
        }

        Ok(Self::with_config(bucket, &sdk_config))
    }

    /// Create a client with explicit AWS configuration
    pub fn with_config(bucket: String, config: &SdkConfig) -> Self {
        let client = S3Client::new(config);
        info!(bucket = %bucket, "Initialized S3 object store");
        S3ObjectStore { client, bucket }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn canned_acl(visibility: Visibility) -> ObjectCannedAcl {
    match visibility {
        Visibility::Private => ObjectCannedAcl::Private,
        Visibility::PublicRead => ObjectCannedAcl::PublicRead,
    }
}

#[async_trait]
impl ObjectStoreClient for S3ObjectStore {
    async fn put(&self, request: PutRequest) -> Result<()> {
        let size = request.body.len();
        debug!(
            bucket = %self.bucket,
            key = %request.key,
            size = size,
            "Starting S3 put_object operation"
        );

        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&request.key)
            .content_type(&request.content_type)
            .acl(canned_acl(request.visibility))
            .body(ByteStream::from(request.body))
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!(
                    bucket = %self.bucket,
                    key = %request.key,
                    size = size,
                    "Uploaded batch to S3"
                );
                Ok(())
            }
            Err(e) => {
                let mapped_error = map_s3_error("put_object", e, &request.key);
                error!(
                    bucket = %self.bucket,
                    key = %request.key,
                    error = %mapped_error,
                    "Failed to upload batch to S3"
                );
                Err(mapped_error)
            }
        }
    }
}

/// Map AWS SDK errors to SpoolError with appropriate context
fn map_s3_error<E, R>(op: &str, error: SdkError<E, R>, key: &str) -> SpoolError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    match &error {
        SdkError::DispatchFailure(dispatch_err) => {
            SpoolError::upload(format!("S3 {op} request failed to dispatch: {dispatch_err:?}"))
        }
        SdkError::TimeoutError(_) => {
            SpoolError::upload(format!("S3 {op} request timed out (key: {key})"))
        }
        SdkError::ResponseError(response_err) => {
            SpoolError::upload(format!("S3 {op} response error: {response_err:?}"))
        }
        SdkError::ServiceError(service_err) => match service_err.err().code() {
            Some("NoSuchBucket") => SpoolError::upload("S3 bucket not found"),
            Some("AccessDenied") | Some("Forbidden") => SpoolError::upload(
                "Access denied to S3 (check credentials and permissions)",
            ),
            Some("InvalidBucketName") => SpoolError::upload("Invalid S3 bucket name"),
            Some(code) => SpoolError::upload(format!(
                "S3 service error ({}): {}",
                code,
                service_err.err().message().unwrap_or("Unknown error")
            )),
            None => SpoolError::upload(format!("S3 {op} service error: {service_err:?}")),
        },
        _ => SpoolError::upload(format!("S3 {op} error: {error:?}")),
    }
}
