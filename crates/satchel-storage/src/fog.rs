//! Generic cloud storage
//!
//! The provider is chosen by `fog_credentials["provider"]`; the remaining
//! credential entries are handed to the matching `object_store` builder as they
//! are. `fog_directory` names the bucket or container.

use crate::keys;
use crate::object::{self, ObjectBucket, ObjectUrl};
use crate::registry::FOG_ENGINE;
use crate::traits::{Storage, StorageContext, StorageError, StorageResult, StoredFile};
use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::signer::Signer;
use object_store::ObjectStore;
use satchel_core::{ConfigValue, SanitizedFile};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_URL_EXPIRATION: u64 = 600;

/// Credential entry holding an already-built `Arc<dyn ObjectStore>`.
pub const CONNECTION_CREDENTIAL: &str = "connection";

/// Cloud providers understood by [`FogStorage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FogProvider {
    Aws,
    Google,
    Azure,
    Local,
    Memory,
}

impl FogProvider {
    pub fn parse(name: &str) -> StorageResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "aws" => Ok(FogProvider::Aws),
            "google" => Ok(FogProvider::Google),
            "azure" | "azurerm" => Ok(FogProvider::Azure),
            "local" => Ok(FogProvider::Local),
            "memory" => Ok(FogProvider::Memory),
            other => Err(StorageError::ConfigError(format!(
                "Unsupported fog provider: {}",
                other
            ))),
        }
    }
}

/// Fog storage implementation
#[derive(Clone)]
pub struct FogStorage {
    objects: ObjectBucket,
    provider: FogProvider,
    signer: Option<Arc<dyn Signer>>,
    public_base: Option<String>,
    host: Option<String>,
    public: bool,
    url_expiration: Duration,
}

impl FogStorage {
    pub fn new(ctx: &StorageContext) -> StorageResult<Self> {
        let raw_credentials = ctx.scope.read_map("fog_credentials")?.unwrap_or_default();
        let connection = raw_credentials
            .get(CONNECTION_CREDENTIAL)
            .and_then(ConfigValue::as_object)
            .and_then(|obj| obj.downcast::<Arc<dyn ObjectStore>>());
        let credentials = object::string_map(Some(raw_credentials.clone()));

        let provider = credentials
            .get("provider")
            .map(|name| FogProvider::parse(name))
            .transpose()?
            .ok_or_else(|| {
                StorageError::ConfigError("fog_credentials provider not configured".to_string())
            })?;
        let directory = ctx.require_str("fog_directory")?;

        let (store, signer, public_base) = match connection {
            Some(store) => (store.as_ref().clone(), None, None),
            None => connect(provider, &directory, &credentials, ctx)?,
        };

        let expiration = ctx
            .config_int("fog_authenticated_url_expiration")?
            .and_then(|secs| u64::try_from(secs).ok())
            .unwrap_or(DEFAULT_URL_EXPIRATION);

        Ok(FogStorage {
            objects: ObjectBucket {
                store,
                label: FOG_ENGINE,
                bucket: directory,
                store_dir: ctx.store_dir.clone(),
                headers: object::string_map(ctx.scope.read_map("fog_attributes")?),
            },
            provider,
            signer,
            public_base,
            host: ctx
                .config_str("fog_host")?
                .map(|h| h.trim_end_matches('/').to_string()),
            public: ctx.config_bool("fog_public")?.unwrap_or(true),
            url_expiration: Duration::from_secs(expiration),
        })
    }

    pub fn provider(&self) -> FogProvider {
        self.provider
    }

    fn url_for(&self, key: &str) -> ObjectUrl {
        let key = keys::encode_key(key);
        if let Some(ref host) = self.host {
            return ObjectUrl::Public(format!("{}/{}", host, key));
        }
        if !self.public {
            return match self.signer {
                Some(ref signer) => ObjectUrl::Signed {
                    signer: Arc::clone(signer),
                    expires_in: self.url_expiration,
                },
                None => ObjectUrl::Unavailable,
            };
        }
        match self.public_base {
            Some(ref base) => ObjectUrl::Public(format!("{}/{}", base, key)),
            None => ObjectUrl::Unavailable,
        }
    }
}

type Connection = (Arc<dyn ObjectStore>, Option<Arc<dyn Signer>>, Option<String>);

fn connect(
    provider: FogProvider,
    directory: &str,
    credentials: &BTreeMap<String, String>,
    ctx: &StorageContext,
) -> StorageResult<Connection> {
    let config_err = |e: object_store::Error| StorageError::ConfigError(e.to_string());

    match provider {
        FogProvider::Aws => {
            let mut builder = AmazonS3Builder::from_env().with_bucket_name(directory);
            if let Some(region) = credentials.get("region") {
                builder = builder.with_region(region.clone());
            }
            if let Some(key_id) = credentials.get("aws_access_key_id") {
                builder = builder.with_access_key_id(key_id.clone());
            }
            if let Some(secret) = credentials.get("aws_secret_access_key") {
                builder = builder.with_secret_access_key(secret.clone());
            }
            if let Some(endpoint) = credentials.get("endpoint") {
                builder = builder
                    .with_endpoint(endpoint.clone())
                    .with_allow_http(endpoint.starts_with("http://"));
            }
            let store = Arc::new(builder.build().map_err(config_err)?);
            let base = format!("https://{}.s3.amazonaws.com", directory);
            Ok(signing(store, base))
        }
        FogProvider::Google => {
            let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(directory);
            if let Some(path) = credentials.get("google_json_key_location") {
                builder = builder.with_service_account_path(path.clone());
            }
            if let Some(key) = credentials.get("google_json_key_string") {
                builder = builder.with_service_account_key(key.clone());
            }
            let store = Arc::new(builder.build().map_err(config_err)?);
            let base = format!("https://storage.googleapis.com/{}", directory);
            Ok(signing(store, base))
        }
        FogProvider::Azure => {
            let account = credentials
                .get("azure_storage_account_name")
                .cloned()
                .ok_or_else(|| {
                    StorageError::ConfigError(
                        "fog_credentials azure_storage_account_name not configured".to_string(),
                    )
                })?;
            let mut builder = MicrosoftAzureBuilder::from_env()
                .with_account(account.clone())
                .with_container_name(directory);
            if let Some(key) = credentials.get("azure_storage_access_key") {
                builder = builder.with_access_key(key.clone());
            }
            let store = Arc::new(builder.build().map_err(config_err)?);
            let base = format!("https://{}.blob.core.windows.net/{}", account, directory);
            Ok(signing(store, base))
        }
        FogProvider::Local => {
            let local_root = credentials
                .get("local_root")
                .map(PathBuf::from)
                .unwrap_or_else(|| ctx.root.clone());
            let dir = local_root.join(directory);
            std::fs::create_dir_all(&dir).map_err(|e| {
                StorageError::ConfigError(format!(
                    "Failed to create storage directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
            let store: Arc<dyn ObjectStore> =
                Arc::new(LocalFileSystem::new_with_prefix(&dir).map_err(config_err)?);
            Ok((store, None, None))
        }
        FogProvider::Memory => {
            let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
            Ok((store, None, None))
        }
    }
}

fn signing<S>(store: Arc<S>, public_base: String) -> Connection
where
    S: ObjectStore + Signer + 'static,
{
    let signer: Arc<dyn Signer> = store.clone();
    let store: Arc<dyn ObjectStore> = store;
    (store, Some(signer), Some(public_base))
}

#[async_trait]
impl Storage for FogStorage {
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
        FOG_ENGINE
    }
}
