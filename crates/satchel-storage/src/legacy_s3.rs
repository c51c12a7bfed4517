use crate::keys;
use crate::object::{self, ObjectBucket, ObjectUrl};
use crate::registry::RIGHT_S3_ENGINE;
use crate::s3::S3Settings;
use crate::traits::{Storage, StorageContext, StorageError, StorageResult, StoredFile};
use async_trait::async_trait;
use object_store::aws::AmazonS3;
use object_store::signer::Signer;
use object_store::ObjectStore;
use satchel_core::SanitizedFile;
use std::sync::Arc;

/// Path-style S3 storage
///
/// Same `s3_*` credentials as [`S3Storage`](crate::s3::S3Storage), but every
/// request and URL addresses the bucket as the first path segment:
/// `{scheme}://s3.amazonaws.com/{bucket}/{key}`. Non-public access policies
/// get path-style signed URLs.
#[derive(Clone)]
pub struct LegacyS3Storage {
    objects: ObjectBucket,
    signer: Arc<dyn Signer>,
    settings: S3Settings,
}

impl LegacyS3Storage {
    pub fn new(ctx: &StorageContext) -> StorageResult<Self> {
        let settings = S3Settings::from_context(ctx)?;
        let store: Arc<AmazonS3> = Arc::new(
            settings
                .builder(ctx)?
                .with_virtual_hosted_style_request(false)
                .build()
                .map_err(|e| StorageError::ConfigError(e.to_string()))?,
        );

        Ok(LegacyS3Storage {
            objects: ObjectBucket {
                store: store.clone(),
                label: RIGHT_S3_ENGINE,
                bucket: settings.bucket.clone(),
                store_dir: ctx.store_dir.clone(),
                headers: object::string_map(ctx.scope.read_map("s3_headers")?),
            },
            signer: store,
            settings,
        })
    }

    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.objects.store = store;
        self
    }

    fn generate_url(&self, key: &str) -> String {
        match self.settings.endpoint {
            Some(ref endpoint) => format!(
                "{}/{}/{}",
                endpoint,
                self.settings.bucket,
                keys::encode_key(key)
            ),
            None => format!(
                "{}://s3.amazonaws.com/{}/{}",
                object::scheme(self.settings.use_ssl),
                self.settings.bucket,
                keys::encode_key(key)
            ),
        }
    }

    fn url_for(&self, key: &str) -> ObjectUrl {
        if self.settings.public {
            ObjectUrl::Public(self.generate_url(key))
        } else {
            ObjectUrl::Signed {
                signer: Arc::clone(&self.signer),
                expires_in: self.settings.authentication_timeout,
            }
        }
    }
}

#[async_trait]
impl Storage for LegacyS3Storage {
    async fn store(&self, file: SanitizedFile) -> StorageResult<Arc<dyn StoredFile>> {
        let (key, content_type) = self.objects.put(&file).await?;
        let url = self.url_for(&key);
        Ok(self.objects.handle(key, content_type, url))
    }

    async fn retrieve(&self, identifier: &str) -> StorageResult<Arc<dyn StoredFile>> {
        let key = self.objects.existing_key(identifier).await?;
        let url = self.url_for(&key);
        Ok(self
            .objects
            .handle(key, keys::guess_content_type(identifier), url))
    }

    fn engine_name(&self) -> &'static str {
        RIGHT_S3_ENGINE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context;
    use object_store::memory::InMemory;
    use satchel_core::ConfigValue;

    #[tokio::test]
    async fn test_path_style_urls() {
        let ctx = context(
            std::path::Path::new("/tmp"),
            vec![
                ("s3_bucket", ConfigValue::from("archive")),
                ("s3_access_key_id", ConfigValue::from("AKIDEXAMPLE")),
                ("s3_secret_access_key", ConfigValue::from("secret")),
            ],
        );
        let storage = LegacyS3Storage::new(&ctx)
            .unwrap()
            .with_object_store(Arc::new(InMemory::new()));
        assert_eq!(storage.engine_name(), "right_s3");

        let stored = storage
            .store(SanitizedFile::from_bytes(&b"doc"[..], "report.pdf"))
            .await
            .unwrap();
        assert_eq!(
            stored.url().await.unwrap().as_deref(),
            Some("http://s3.amazonaws.com/archive/uploads/report.pdf")
        );
        assert!(stored.delete().await.unwrap());
    }

    #[tokio::test]
    async fn test_private_policy_signs_path_style_urls() {
        let ctx = context(
            std::path::Path::new("/tmp"),
            vec![
                ("s3_bucket", ConfigValue::from("archive")),
                ("s3_access_key_id", ConfigValue::from("AKIDEXAMPLE")),
                ("s3_secret_access_key", ConfigValue::from("secret")),
                ("s3_access_policy", ConfigValue::symbol("private")),
                ("s3_authentication_timeout", ConfigValue::from(120i64)),
            ],
        );
        let storage = LegacyS3Storage::new(&ctx)
            .unwrap()
            .with_object_store(Arc::new(InMemory::new()));

        let stored = storage
            .store(SanitizedFile::from_bytes(&b"doc"[..], "report.pdf"))
            .await
            .unwrap();
        let url = stored.url().await.unwrap().unwrap();
        assert!(url.contains("/archive/uploads/report.pdf"), "{}", url);
        assert!(url.contains("X-Amz-Signature="));
        assert!(url.contains("X-Amz-Expires=120"));
    }
}
