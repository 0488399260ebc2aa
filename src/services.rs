use std::sync::Arc;

use crate::config::Config;
use crate::db::{KeyValueStore, PlayEventStore};

pub trait Services {
    fn store(&self) -> Arc<impl PlayEventStore + Send + Sync>;
    fn kv(&self) -> Arc<impl KeyValueStore + Send + Sync>;

    fn config(&self) -> Arc<Config>;
}

pub struct ServicesContainer<D: PlayEventStore + KeyValueStore> {
    pub database: Arc<D>,
    pub config: Arc<Config>,
}

impl<D: PlayEventStore + KeyValueStore> Clone for ServicesContainer<D> {
    fn clone(&self) -> Self {
        Self {
            database: self.database.clone(),
            config: self.config.clone(),
        }
    }
}

impl<D> ServicesContainer<D>
where
    D: PlayEventStore + KeyValueStore,
{
    pub fn new(database: D, config: Config) -> Self {
        Self {
            database: Arc::new(database),
            config: Arc::new(config),
        }
    }
}

#[cfg(test)]
impl ServicesContainer<crate::db::SqliteDatabase> {
    pub async fn new_mock() -> Result<Self, human_errors::Error> {
        Self::new_mock_with_config(Config::default()).await
    }

    pub async fn new_mock_with_config(config: Config) -> Result<Self, human_errors::Error> {
        let database = crate::db::SqliteDatabase::open_in_memory().await?;
        Ok(Self::new(database, config))
    }
}

impl<D> Services for ServicesContainer<D>
where
    D: PlayEventStore + KeyValueStore + Send + Sync,
{
    fn store(&self) -> Arc<impl PlayEventStore + Send + Sync> {
        self.database.clone()
    }

    fn kv(&self) -> Arc<impl KeyValueStore + Send + Sync> {
        self.database.clone()
    }

    fn config(&self) -> Arc<Config> {
        self.config.clone()
    }
}
