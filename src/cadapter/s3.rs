//! S3 adapter: aws-sdk-s3 backed ObjectBackend with multipart upload for
//! large objects, basic retries and Content-MD5 checks.

use crate::cadapter::client::{BackendError, ObjectBackend};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use std::sync::Arc;
use tokio::{
    io::AsyncReadExt,
    sync::Semaphore,
    time::{Duration, sleep},
};
use tracing::{debug, warn};

/// S3 backend options
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    /// S3-compatible endpoint, e.g. `http://127.0.0.1:9000`
    pub endpoint: String,
    pub region: String,
    /// Part size in bytes; objects above it go through multipart upload.
    pub part_size: usize,
    /// Max concurrent part uploads
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: "bundlefs".to_string(),
            endpoint: "http://127.0.0.1:9000".to_string(),
            region: "us-east-1".to_string(),
            part_size: 8 * 1024 * 1024, // 8MB
            max_concurrency: 8,
            max_retries: 3,
            initial_retry_delay_ms: 100,
        }
    }
}

pub struct S3Backend {
    client: Client,
    config: S3Config,
}

impl S3Backend {
    /// Credentials are read from the standard AWS environment variables.
    pub async fn new(config: S3Config) -> Result<Self, BackendError> {
        let conf = aws_config::ConfigLoader::default()
            .credentials_provider(
                aws_config::environment::EnvironmentVariableCredentialsProvider::new(),
            )
            .region(aws_config::Region::new(config.region.clone()))
            .endpoint_url(config.endpoint.clone())
            .load()
            .await;
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf)
            .force_path_style(true)
            .build();
        let client = Client::from_conf(s3_conf);
        Ok(Self { client, config })
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    fn md5_base64(data: &[u8]) -> String {
        let sum = md5::compute(data);
        B64.encode(sum.0)
    }

    async fn execute_with_retry<T, F, Fut, E>(
        &self,
        operation: F,
        operation_name: &'static str,
    ) -> Result<T, BackendError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        let mut attempt = 0;
        let max_retries = self.config.max_retries;
        loop {
            attempt += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if attempt > max_retries {
                        return Err(Box::new(std::io::Error::other(format!(
                            "{operation_name} failed after {max_retries} attempts: {e}"
                        ))));
                    }
                    debug!(operation_name, attempt, error = %e, "s3 request failed, retrying");
                    let delay_ms = self.config.initial_retry_delay_ms * 2u64.pow(attempt - 1);
                    sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
        semaphore: Arc<Semaphore>,
    ) -> Result<(i32, Option<String>), BackendError> {
        let _permit = semaphore.acquire().await?;
        let checksum = Self::md5_base64(&data);

        let operation = || async {
            self.client
                .upload_part()
                .bucket(&self.config.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .content_md5(checksum.clone())
                .body(data.clone().into())
                .send()
                .await
        };

        self.execute_with_retry(operation, "upload_part")
            .await
            .map(|resp| (part_number, resp.e_tag().map(|s| s.to_string())))
    }

    async fn put_multipart(&self, key: &str, data: &[u8]) -> Result<(), BackendError> {
        let create = self
            .client
            .create_multipart_upload()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await?;
        let upload_id = create.upload_id().unwrap_or_default().to_string();
        let sem = Arc::new(Semaphore::new(self.config.max_concurrency));

        let parts = data
            .chunks(self.config.part_size)
            .enumerate()
            .map(|(i, chunk)| {
                self.upload_part(key, &upload_id, i as i32 + 1, chunk.to_vec(), sem.clone())
            })
            .collect::<Vec<_>>();

        let results = match futures::future::try_join_all(parts).await {
            Ok(v) => v,
            Err(e) => {
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.config.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key, error = %abort, "abort multipart upload failed");
                }
                return Err(e);
            }
        };

        let completed_parts = results
            .into_iter()
            .map(|(pn, etag)| {
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(pn)
                    .set_e_tag(etag)
                    .build()
            })
            .collect::<Vec<_>>();

        let completed = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.config.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<(), BackendError> {
        if data.len() > self.config.part_size {
            return self.put_multipart(key, data).await;
        }
        let checksum = Self::md5_base64(data);
        let operation = || async {
            self.client
                .put_object()
                .bucket(&self.config.bucket)
                .key(key)
                .body(data.to_owned().into())
                .content_md5(checksum.clone())
                .send()
                .await
        };
        self.execute_with_retry(operation, "put_object").await?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await;
        match resp {
            Ok(o) => {
                let mut body = o.body.into_async_read();
                let mut buf = Vec::new();
                body.read_to_end(&mut buf).await?;
                Ok(Some(buf))
            }
            Err(e) => {
                // NoSuchKey is an absent object, anything else is a failure
                let msg = format!("{e:?}");
                if msg.contains("NoSuchKey") {
                    Ok(None)
                } else {
                    Err(Box::new(e))
                }
            }
        }
    }

    async fn delete_object(&self, key: &str) -> Result<(), BackendError> {
        let operation = || async {
            self.client
                .delete_object()
                .bucket(&self.config.bucket)
                .key(key)
                .send()
                .await
        };
        self.execute_with_retry(operation, "delete_object").await?;
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.config.bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await?;
            keys.extend(
                resp.contents()
                    .iter()
                    .filter_map(|o| o.key().map(str::to_string)),
            );
            match resp.next_continuation_token() {
                Some(next) if resp.is_truncated().unwrap_or(false) => {
                    token = Some(next.to_string());
                }
                _ => break,
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // needs a reachable S3 endpoint; enabled with BUNDLEFS_S3_TEST=1
    #[tokio::test]
    async fn test_s3_backend() -> Result<(), BackendError> {
        if std::env::var("BUNDLEFS_S3_TEST").ok().as_deref() != Some("1") {
            eprintln!("skip s3 test: set BUNDLEFS_S3_TEST=1 to enable");
            return Ok(());
        }
        let backend = S3Backend::new(S3Config::default()).await?;
        let data_1 = Vec::from("hello");
        backend.put_object("test_0", &data_1).await?;

        let res = backend.get_object("test_0").await?.unwrap();
        assert_eq!(data_1, res);
        assert!(backend.list_objects("test_").await?.contains(&"test_0".to_string()));

        backend.delete_object("test_0").await?;
        assert_eq!(backend.get_object("test_0").await?, None);
        Ok(())
    }

    #[test]
    fn test_md5_base64_known_value() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(S3Backend::md5_base64(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }
}
