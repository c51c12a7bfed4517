use crate::object::{self, ObjectBucket, ObjectUrl};
use crate::registry::S3_ENGINE;
use crate::traits::{Storage, StorageContext, StorageError, StorageResult, StoredFile};
use crate::keys;
use async_trait::async_trait;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::signer::Signer;
use object_store::ObjectStore;
use satchel_core::SanitizedFile;
use std::sync::Arc;
use std::time::Duration;

pub(crate) const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_AUTHENTICATION_TIMEOUT: u64 = 600;

/// Access policies that make an object readable without a signature.
const PUBLIC_POLICIES: &[&str] = &["public_read", "public_read_write"];

/// `s3_*` settings shared by the S3 and legacy S3 backends.
#[derive(Clone, Debug)]
pub(crate) struct S3Settings {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub use_ssl: bool,
    pub cnamed: bool,
    pub public: bool,
    pub authentication_timeout: Duration,
}

impl S3Settings {
    pub fn from_context(ctx: &StorageContext) -> StorageResult<Self> {
        let policy = ctx
            .config_str("s3_access_policy")?
            .unwrap_or_else(|| "public_read".to_string());
        let timeout = ctx
            .config_int("s3_authentication_timeout")?
            .and_then(|secs| u64::try_from(secs).ok())
            .unwrap_or(DEFAULT_AUTHENTICATION_TIMEOUT);

        Ok(S3Settings {
            bucket: ctx.require_str("s3_bucket")?,
            region: ctx
                .config_str("s3_region")?
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            endpoint: ctx
                .config_str("s3_endpoint")?
                .map(|e| e.trim_end_matches('/').to_string()),
            use_ssl: ctx.config_bool("s3_use_ssl")?.unwrap_or(false),
            cnamed: ctx.config_bool("s3_cnamed")?.unwrap_or(false),
            public: PUBLIC_POLICIES.contains(&policy.as_str()),
            authentication_timeout: Duration::from_secs(timeout),
        })
    }

    /// Build the AmazonS3 client from the environment and explicit settings.
    pub fn builder(&self, ctx: &StorageContext) -> StorageResult<AmazonS3Builder> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(self.region.clone())
            .with_bucket_name(self.bucket.clone());

        if let Some(key_id) = ctx.config_str("s3_access_key_id")? {
            builder = builder.with_access_key_id(key_id);
        }
        if let Some(secret) = ctx.config_str("s3_secret_access_key")? {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(ref endpoint) = self.endpoint {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }
        Ok(builder)
    }
}

/// S3 storage implementation
///
/// Objects go through `object_store`; URLs are virtual-hosted unless a custom
/// endpoint or a CNAMEd bucket is configured. Non-public access policies get
/// signed URLs valid for `s3_authentication_timeout` seconds.
#[derive(Clone)]
pub struct S3Storage {
    objects: ObjectBucket,
    signer: Arc<dyn Signer>,
    settings: S3Settings,
}

impl S3Storage {
    pub fn new(ctx: &StorageContext) -> StorageResult<Self> {
        let settings = S3Settings::from_context(ctx)?;
        let store: Arc<AmazonS3> = Arc::new(
            settings
                .builder(ctx)?
                .with_virtual_hosted_style_request(settings.endpoint.is_none())
                .build()
                .map_err(|e| StorageError::ConfigError(e.to_string()))?,
        );

        Ok(S3Storage {
            objects: ObjectBucket {
                store: store.clone(),
                label: S3_ENGINE,
                bucket: settings.bucket.clone(),
                store_dir: ctx.store_dir.clone(),
                headers: object::string_map(ctx.scope.read_map("s3_headers")?),
            },
            signer: store,
            settings,
        })
    }

    /// Route object traffic through another store, keeping S3 URL generation.
    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.objects.store = store;
        self
    }

    /// Generate public URL for S3 object
    ///
    /// For AWS S3: {scheme}://{bucket}.s3.{region}.amazonaws.com/{key}
    /// For a CNAMEd bucket: {scheme}://{bucket}/{key}
    /// For S3-compatible providers: {endpoint}/{bucket}/{key}
    fn generate_url(&self, key: &str) -> String {
        let key = keys::encode_key(key);
        let scheme = object::scheme(self.settings.use_ssl);
        if self.settings.cnamed {
            format!("{}://{}/{}", scheme, self.settings.bucket, key)
        } else if let Some(ref endpoint) = self.settings.endpoint {
            format!("{}/{}/{}", endpoint, self.settings.bucket, key)
        } else {
            format!(
                "{}://{}.s3.{}.amazonaws.com/{}",
                scheme, self.settings.bucket, self.settings.region, key
            )
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
impl Storage for S3Storage {
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
        S3_ENGINE
    }
}
