use async_trait::async_trait;
use reqwest::Method;

use super::{ApiError, BucketApi, GoogleApi};
use crate::policy::BucketPolicy;

/// Cloud Storage JSON API bucket IAM endpoints.
pub struct StorageClient {
    api: GoogleApi,
    base_url: String,
}

impl StorageClient {
    pub fn new(api: GoogleApi, base_url: &str) -> Self {
        Self {
            api,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn iam_url(&self, bucket: &str) -> String {
        format!("{}/b/{}/iam", self.base_url, bucket)
    }
}

#[async_trait]
impl BucketApi for StorageClient {
    async fn get_iam_policy(&self, bucket: &str) -> Result<Option<BucketPolicy>, ApiError> {
        let request = self.api.request(Method::GET, &self.iam_url(bucket));
        match self.api.send(request).await {
            Ok(response) => {
                let policy: BucketPolicy = GoogleApi::json(response).await?;
                Ok(Some(policy))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn set_iam_policy(&self, bucket: &str, policy: &BucketPolicy) -> Result<(), ApiError> {
        // The etag inside the body makes the write conditional.
        let request = self
            .api
            .request(Method::PUT, &self.iam_url(bucket))
            .json(policy);
        self.api.send(request).await?;
        Ok(())
    }
}
