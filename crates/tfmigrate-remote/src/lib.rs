//! Object storage history backends.
//!
//! Stores the history file as a single object and takes the lock by writing
//! `<key>.lock` with a create-only put, so two runs racing for the lock
//! cannot both succeed.

use std::sync::Arc;

use async_trait::async_trait;
use object_store::aws::{AmazonS3Builder, S3ConditionalPut};
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload};

use tfmigrate_core::storage::{self, Storage, StorageConfig, StorageError, LOCK_SUFFIX};

/// History storage backed by an [`ObjectStore`].
#[derive(Debug)]
pub struct ObjectStoreStorage {
    store: Arc<dyn ObjectStore>,
    path: ObjectPath,
    lock_path: ObjectPath,
}

impl ObjectStoreStorage {
    /// Store the history at `key` inside `store`.
    pub fn new(store: Arc<dyn ObjectStore>, key: &str) -> Result<Self, StorageError> {
        let path = parse_key(key)?;
        let lock_path = parse_key(&format!("{}{}", key, LOCK_SUFFIX))?;
        Ok(Self {
            store,
            path,
            lock_path,
        })
    }

    /// Object path of the history file.
    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Object path of the lock marker.
    pub fn lock_path(&self) -> &ObjectPath {
        &self.lock_path
    }
}

fn parse_key(key: &str) -> Result<ObjectPath, StorageError> {
    ObjectPath::parse(key).map_err(|e| StorageError::Backend {
        target: key.to_string(),
        source: Box::new(e),
    })
}

fn backend_error(target: impl ToString) -> impl FnOnce(object_store::Error) -> StorageError {
    move |e| StorageError::Backend {
        target: target.to_string(),
        source: Box::new(e),
    }
}

#[async_trait]
impl Storage for ObjectStoreStorage {
    async fn write(&self, bytes: &[u8]) -> Result<(), StorageError> {
        self.store
            .put(&self.path, PutPayload::from(bytes.to_vec()))
            .await
            .map_err(backend_error(&self.path))?;
        tracing::debug!(path = %self.path, bytes = bytes.len(), "history object written");
        Ok(())
    }

    async fn read(&self) -> Result<Vec<u8>, StorageError> {
        match self.store.get(&self.path).await {
            Ok(result) => {
                let bytes = result.bytes().await.map_err(backend_error(&self.path))?;
                Ok(bytes.to_vec())
            }
            Err(object_store::Error::NotFound { .. }) => {
                tracing::debug!(path = %self.path, "history object not found");
                Ok(Vec::new())
            }
            Err(e) => Err(backend_error(&self.path)(e)),
        }
    }

    async fn write_lock(&self) -> Result<(), StorageError> {
        let opts = PutOptions {
            mode: PutMode::Create,
            ..Default::default()
        };

        match self
            .store
            .put_opts(&self.lock_path, PutPayload::from(Vec::new()), opts)
            .await
        {
            Ok(_) => {
                tracing::debug!(lock = %self.lock_path, "lock acquired");
                Ok(())
            }
            Err(object_store::Error::AlreadyExists { .. }) => Err(StorageError::Locked {
                target: self.lock_path.to_string(),
            }),
            Err(e) => Err(backend_error(&self.lock_path)(e)),
        }
    }

    async fn unlock(&self) -> Result<(), StorageError> {
        match self.store.delete(&self.lock_path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {
                tracing::debug!(lock = %self.lock_path, "lock released");
                Ok(())
            }
            Err(e) => Err(backend_error(&self.lock_path)(e)),
        }
    }
}

/// Open any configured history backend.
///
/// Local and mock backends are delegated to the core crate; S3, GCS and
/// Azure credentials are read from the environment the way their SDKs do.
pub fn open_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>, StorageError> {
    let (store, key): (Arc<dyn ObjectStore>, &str) = match config {
        StorageConfig::Local { .. } | StorageConfig::Mock(_) => return storage::open(config),
        StorageConfig::S3 {
            bucket,
            key,
            region,
            endpoint,
        } => {
            let mut builder = AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .with_conditional_put(S3ConditionalPut::ETagMatch);
            if let Some(region) = region {
                builder = builder.with_region(region);
            }
            if let Some(endpoint) = endpoint {
                builder = builder
                    .with_endpoint(endpoint)
                    .with_allow_http(endpoint.starts_with("http://"));
            }
            let store = builder.build().map_err(backend_error(bucket))?;
            (Arc::new(store) as Arc<dyn ObjectStore>, key.as_str())
        }
        StorageConfig::Gcs { bucket, name } => {
            let store = GoogleCloudStorageBuilder::from_env()
                .with_bucket_name(bucket)
                .build()
                .map_err(backend_error(bucket))?;
            (Arc::new(store) as Arc<dyn ObjectStore>, name.as_str())
        }
        StorageConfig::Azure {
            account,
            container,
            blob,
        } => {
            let store = MicrosoftAzureBuilder::from_env()
                .with_account(account)
                .with_container_name(container)
                .build()
                .map_err(backend_error(container))?;
            (Arc::new(store) as Arc<dyn ObjectStore>, blob.as_str())
        }
    };

    tracing::info!(backend = config.kind(), key, "opening remote history storage");
    Ok(Arc::new(ObjectStoreStorage::new(store, key)?))
}
