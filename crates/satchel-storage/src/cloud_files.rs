//! Rackspace Cloud Files storage
//!
//! Authentication is a Swift v1 handshake: a GET on the auth endpoint with
//! `X-Auth-User` / `X-Auth-Key` returns the account's storage URL and a token.
//! It runs once, on the first operation that needs the container.

use crate::keys;
use crate::object::{ObjectBucket, ObjectUrl};
use crate::registry::CLOUD_FILES_ENGINE;
use crate::traits::{Storage, StorageContext, StorageError, StorageResult, StoredFile};
use async_trait::async_trait;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use object_store::http::HttpBuilder;
use object_store::ClientOptions;
use satchel_core::SanitizedFile;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub const DEFAULT_AUTH_URL: &str = "https://auth.api.rackspacecloud.com/v1.0";

const AUTH_USER: &str = "x-auth-user";
const AUTH_KEY: &str = "x-auth-key";
const AUTH_TOKEN: &str = "x-auth-token";
const STORAGE_URL: &str = "x-storage-url";

/// Result of the auth handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloudFilesSession {
    pub storage_url: String,
    pub token: String,
}

/// Swift v1 authentication against `auth_url`.
pub async fn authenticate(
    client: &reqwest::Client,
    auth_url: &str,
    username: &str,
    api_key: &str,
) -> StorageResult<CloudFilesSession> {
    let start = std::time::Instant::now();

    let response = client
        .get(auth_url)
        .header(AUTH_USER, username)
        .header(AUTH_KEY, api_key)
        .send()
        .await
        .map_err(|e| StorageError::BackendError(format!("Cloud Files auth request failed: {}", e)))?;

    if !response.status().is_success() {
        tracing::error!(
            status = %response.status(),
            auth_url = %auth_url,
            "Cloud Files authentication failed"
        );
        return Err(StorageError::ConfigError(format!(
            "Cloud Files authentication failed with status {}",
            response.status()
        )));
    }

    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                StorageError::BackendError(format!("Cloud Files auth response missing {}", name))
            })
    };
    let session = CloudFilesSession {
        storage_url: header(STORAGE_URL)?,
        token: header(AUTH_TOKEN)?,
    };

    tracing::info!(
        storage_url = %session.storage_url,
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Cloud Files authentication successful"
    );

    Ok(session)
}

/// Rewrite a public storage URL to the internal service net.
pub fn service_net_url(storage_url: &str) -> String {
    storage_url.replacen("https://", "https://snet-", 1)
}

struct Connection {
    objects: ObjectBucket,
    container_url: String,
}

/// Cloud Files storage implementation
pub struct CloudFilesStorage {
    client: reqwest::Client,
    auth_url: String,
    username: String,
    api_key: String,
    container: String,
    cdn_host: Option<String>,
    snet: bool,
    store_dir: String,
    connection: OnceCell<Connection>,
}

impl std::fmt::Debug for CloudFilesStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudFilesStorage")
            .field("auth_url", &self.auth_url)
            .field("username", &self.username)
            .field("container", &self.container)
            .field("snet", &self.snet)
            .finish_non_exhaustive()
    }
}

impl CloudFilesStorage {
    pub fn new(ctx: &StorageContext) -> StorageResult<Self> {
        Ok(CloudFilesStorage {
            client: reqwest::Client::new(),
            auth_url: ctx
                .config_str("cloud_files_auth_url")?
                .unwrap_or_else(|| DEFAULT_AUTH_URL.to_string()),
            username: ctx.require_str("cloud_files_username")?,
            api_key: ctx.require_str("cloud_files_api_key")?,
            container: ctx.require_str("cloud_files_container")?,
            cdn_host: ctx
                .config_str("cloud_files_cdn_host")?
                .map(|h| h.trim_end_matches('/').to_string()),
            snet: ctx.config_bool("cloud_files_snet")?.unwrap_or(false),
            store_dir: ctx.store_dir.clone(),
            connection: OnceCell::new(),
        })
    }

    async fn connection(&self) -> StorageResult<&Connection> {
        self.connection
            .get_or_try_init(|| async {
                let session =
                    authenticate(&self.client, &self.auth_url, &self.username, &self.api_key)
                        .await?;
                let storage_url = if self.snet {
                    service_net_url(&session.storage_url)
                } else {
                    session.storage_url.clone()
                };
                let container_url = format!("{}/{}", storage_url, self.container);

                let mut default_headers = HeaderMap::new();
                let token = HeaderValue::from_str(&session.token)
                    .map_err(|e| StorageError::BackendError(e.to_string()))?;
                default_headers.insert(HeaderName::from_static(AUTH_TOKEN), token);

                let options = ClientOptions::new()
                    .with_default_headers(default_headers)
                    .with_allow_http(container_url.starts_with("http://"));
                let store = HttpBuilder::new()
                    .with_url(container_url.clone())
                    .with_client_options(options)
                    .build()
                    .map_err(|e| StorageError::ConfigError(e.to_string()))?;

                Ok::<_, StorageError>(Connection {
                    objects: ObjectBucket {
                        store: Arc::new(store),
                        label: CLOUD_FILES_ENGINE,
                        bucket: self.container.clone(),
                        store_dir: self.store_dir.clone(),
                        headers: BTreeMap::new(),
                    },
                    container_url,
                })
            })
            .await
    }

    fn url_for(&self, connection: &Connection, key: &str) -> ObjectUrl {
        let key = keys::encode_key(key);
        match self.cdn_host {
            Some(ref cdn) => ObjectUrl::Public(format!("{}/{}", cdn, key)),
            None => ObjectUrl::Public(format!("{}/{}", connection.container_url, key)),
        }
    }
}

#[async_trait]
impl Storage for CloudFilesStorage {
    async fn store(&self, file: SanitizedFile) -> StorageResult<Arc<dyn StoredFile>> {
        let connection = self.connection().await?;
        let (key, content_type) = connection.objects.put(&file).await?;
        let url = self.url_for(connection, &key);
        Ok(connection.objects.handle(key, content_type, url))
    }

    async fn retrieve(&self, identifier: &str) -> StorageResult<Arc<dyn StoredFile>> {
        let connection = self.connection().await?;
        let key = connection.objects.existing_key(identifier).await?;
        let url = self.url_for(connection, &key);
        Ok(connection
            .objects
            .handle(key, keys::guess_content_type(identifier), url))
    }

    fn engine_name(&self) -> &'static str {
        CLOUD_FILES_ENGINE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context;
    use satchel_core::ConfigValue;
    use std::path::Path;

    fn cloud_context(auth_url: &str, extra: Vec<(&str, ConfigValue)>) -> StorageContext {
        let mut settings = vec![
            ("cloud_files_username", ConfigValue::from("bob")),
            ("cloud_files_api_key", ConfigValue::from("k3y")),
            ("cloud_files_container", ConfigValue::from("media")),
            ("cloud_files_auth_url", ConfigValue::from(auth_url)),
        ];
        settings.extend(extra);
        context(Path::new("/tmp"), settings)
    }

    #[test]
    fn test_service_net_rewrite() {
        assert_eq!(
            service_net_url("https://storage101.dfw1.clouddrive.com/v1/acct"),
            "https://snet-storage101.dfw1.clouddrive.com/v1/acct"
        );
        assert_eq!(service_net_url("http://local/v1"), "http://local/v1");
    }

    #[test]
    fn test_credentials_are_required() {
        let ctx = context(Path::new("/tmp"), vec![]);
        assert!(matches!(
            CloudFilesStorage::new(&ctx),
            Err(StorageError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_authenticate_reads_session_headers() {
        let mut server = mockito::Server::new_async().await;
        let storage_url = format!("{}/v1/acct", server.url());
        let auth = server
            .mock("GET", "/v1.0")
            .match_header("x-auth-user", "bob")
            .match_header("x-auth-key", "k3y")
            .with_status(204)
            .with_header("x-storage-url", &storage_url)
            .with_header("x-auth-token", "tok")
            .create_async()
            .await;

        let session = authenticate(
            &reqwest::Client::new(),
            &format!("{}/v1.0", server.url()),
            "bob",
            "k3y",
        )
        .await
        .unwrap();

        assert_eq!(session.storage_url, storage_url);
        assert_eq!(session.token, "tok");
        auth.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let mut server = mockito::Server::new_async().await;
        let _auth = server
            .mock("GET", "/v1.0")
            .with_status(401)
            .create_async()
            .await;

        let storage =
            CloudFilesStorage::new(&cloud_context(&format!("{}/v1.0", server.url()), vec![]))
                .unwrap();
        let result = storage
            .store(SanitizedFile::from_bytes(&b"x"[..], "a.txt"))
            .await;
        assert!(matches!(result, Err(StorageError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_store_authenticates_once_and_uses_cdn_host() {
        let mut server = mockito::Server::new_async().await;
        let auth = server
            .mock("GET", "/v1.0")
            .with_status(204)
            .with_header("x-storage-url", &format!("{}/v1/acct", server.url()))
            .with_header("x-auth-token", "tok")
            .expect(1)
            .create_async()
            .await;
        let put = server
            .mock("PUT", "/v1/acct/media/uploads/a.txt")
            .match_header("x-auth-token", "tok")
            .with_status(201)
            .expect(2)
            .create_async()
            .await;

        let storage = CloudFilesStorage::new(&cloud_context(
            &format!("{}/v1.0", server.url()),
            vec![("cloud_files_cdn_host", ConfigValue::from("https://cdn.example.com"))],
        ))
        .unwrap();

        for _ in 0..2 {
            let stored = storage
                .store(SanitizedFile::from_bytes(&b"x"[..], "a.txt"))
                .await
                .unwrap();
            assert_eq!(
                stored.url().await.unwrap().as_deref(),
                Some("https://cdn.example.com/uploads/a.txt")
            );
        }

        auth.assert_async().await;
        put.assert_async().await;
    }
}
