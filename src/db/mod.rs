use std::{borrow::Cow, path::PathBuf};

use chrono::NaiveDate;
use human_errors as errors;

mod models;
mod sqlite;

pub use models::{
    ArtistFrequency, FrequencySnapshot, ListeningStatistics, PlayEvent, TrackFrequency,
};
pub use sqlite::SqliteDatabase;

#[async_trait::async_trait]
pub trait KeyValueStore {
    async fn get<
        P: Into<Cow<'static, str>> + Send,
        K: Into<Cow<'static, str>> + Send,
        T: serde::de::DeserializeOwned + Send + 'static,
    >(
        &self,
        partition: P,
        key: K,
    ) -> Result<Option<T>, errors::Error>;

    async fn set<
        P: Into<Cow<'static, str>> + Send,
        K: Into<Cow<'static, str>> + Send,
        T: serde::Serialize + Send + 'static,
    >(
        &self,
        partition: P,
        key: K,
        value: T,
    ) -> Result<(), errors::Error>;

    async fn remove<P: Into<Cow<'static, str>> + Send, K: Into<Cow<'static, str>> + Send>(
        &self,
        partition: P,
        key: K,
    ) -> Result<(), errors::Error>;
}

/// Durable, deduplicated record of play events along with the aggregate
/// views that are derived from it.
#[async_trait::async_trait]
pub trait PlayEventStore {
    /// Records `events`, skipping any whose `(date, time, track_id)` is already
    /// present, and returns how many were newly inserted.
    async fn record_events(&self, events: Vec<PlayEvent>) -> Result<usize, errors::Error>;

    /// Tracks ordered by play count (descending), then track name.
    async fn track_frequencies(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<TrackFrequency>, errors::Error>;

    /// Artists ordered by play count (descending), then artist name.
    async fn artist_frequencies(&self) -> Result<Vec<ArtistFrequency>, errors::Error>;

    /// Reads the (limited) track view and the full artist view in one transaction.
    async fn frequency_snapshot(
        &self,
        limit: Option<usize>,
    ) -> Result<FrequencySnapshot, errors::Error>;

    async fn statistics(&self) -> Result<ListeningStatistics, errors::Error>;

    /// Removes every event played before `cutoff` and returns how many were deleted.
    async fn delete_before(&self, cutoff: NaiveDate) -> Result<usize, errors::Error>;

    /// Writes a consistent copy of the database to `path`, which must not exist yet.
    async fn backup(&self, path: PathBuf) -> Result<(), errors::Error>;
}
