use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use thiserror::Error;

use super::{RoomStore, memory::MemoryRoomStore};
use crate::dao::storage::StorageResult;

/// Environment variable naming the room store backend.
pub const STORE_BACKEND_ENV: &str = "WYR_STORE";

/// Room store implementations the server can run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local store; rooms are lost on restart.
    Memory,
    #[cfg(feature = "mongo-store")]
    Mongo,
    #[cfg(feature = "couch-store")]
    Couch,
}

#[derive(Debug, Error)]
#[error("unknown store backend `{0}`")]
pub struct UnknownBackend(String);

impl FromStr for StoreBackend {
    type Err = UnknownBackend;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(StoreBackend::Memory),
            #[cfg(feature = "mongo-store")]
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            #[cfg(feature = "couch-store")]
            "couch" | "couchdb" => Ok(StoreBackend::Couch),
            other => Err(UnknownBackend(other.to_owned())),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreBackend::Memory => "memory",
            #[cfg(feature = "mongo-store")]
            StoreBackend::Mongo => "mongodb",
            #[cfg(feature = "couch-store")]
            StoreBackend::Couch => "couchdb",
        };
        f.write_str(name)
    }
}

impl StoreBackend {
    /// Backend selected through [`STORE_BACKEND_ENV`], defaulting to the in-memory store.
    pub fn from_env() -> Result<Self, UnknownBackend> {
        match std::env::var(STORE_BACKEND_ENV) {
            Ok(value) if !value.trim().is_empty() => value.parse(),
            _ => Ok(StoreBackend::Memory),
        }
    }

    /// Open a connection to the backend. The memory backend never fails.
    pub async fn connect(self, poll_interval: Duration) -> StorageResult<Arc<dyn RoomStore>> {
        match self {
            StoreBackend::Memory => Ok(Arc::new(MemoryRoomStore::new())),
            #[cfg(feature = "mongo-store")]
            StoreBackend::Mongo => {
                use super::mongodb::{MongoConfig, MongoRoomStore};

                let config = MongoConfig::from_env(poll_interval).await?;
                let store = MongoRoomStore::connect(config).await?;
                Ok(Arc::new(store))
            }
            #[cfg(feature = "couch-store")]
            StoreBackend::Couch => {
                use super::couchdb::{CouchConfig, CouchRoomStore};

                let config = CouchConfig::from_env(poll_interval)?;
                let store = CouchRoomStore::connect(config).await?;
                Ok(Arc::new(store))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backend_names() {
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert_eq!(" MEM ".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("sqlite".parse::<StoreBackend>().is_err());
        #[cfg(feature = "mongo-store")]
        assert_eq!("MongoDB".parse::<StoreBackend>().unwrap(), StoreBackend::Mongo);
        #[cfg(feature = "couch-store")]
        assert_eq!("couch".parse::<StoreBackend>().unwrap(), StoreBackend::Couch);
    }

    #[tokio::test]
    async fn memory_backend_connects_without_configuration() {
        let store = StoreBackend::Memory
            .connect(Duration::from_millis(10))
            .await
            .unwrap();
        assert!(store.health_check().await.is_ok());
    }
}
