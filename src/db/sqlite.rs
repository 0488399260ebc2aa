use std::{borrow::Cow, path::{Path, PathBuf}, sync::Arc};

use chrono::NaiveDate;
use human_errors::{self as errors, ResultExt};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;
use tracing::instrument;

use crate::db::{
    ArtistFrequency, FrequencySnapshot, KeyValueStore, ListeningStatistics, PlayEvent,
    PlayEventStore, TrackFrequency,
};

#[derive(Clone)]
pub struct SqliteDatabase {
    connection: Arc<Connection>,
}

const ADVICE_DB_ERROR: &[&str] = &[
    "Make sure that the database file is accessible and not corrupted.",
    "If the problem persists, please report the issue to the development team via GitHub.",
];

const ADVICE_REPORT_DEV: &[&str] =
    &["Please report this issue to the development team via GitHub."];

impl SqliteDatabase {
    pub async fn open(path: &Path) -> Result<Self, errors::Error> {
        let connection = Connection::open(path).await.wrap_err_as_user(
            format!("Unable to open SQLite database file '{}'.", path.display()),
            &["Make sure the file path is correct and accessible."],
        )?;

        let mut db = Self {
            connection: Arc::new(connection),
        };
        db.initialize().await?;

        Ok(db)
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, errors::Error> {
        let connection = Connection::open_in_memory().await.map_err_as_system(&[
            "Make sure that there is enough memory available to create an in-memory database.",
        ])?;

        let mut db = Self {
            connection: Arc::new(connection),
        };
        db.initialize().await?;

        Ok(db)
    }

    async fn initialize(&mut self) -> Result<(), errors::Error> {
        self.connection
            .call(|c| {
                c.execute(
                    "CREATE TABLE IF NOT EXISTS migrations (
                    id INTEGER PRIMARY KEY
                )",
                    [],
                )
            })
            .await
            .wrap_err_as_system(
                "Failed to initialize the migrations table.",
                ADVICE_DB_ERROR,
            )?;

        let latest_migration: usize = self
            .connection
            .call(|c| {
                c.query_row("SELECT COALESCE(MAX(id), 0) FROM migrations", [], |r| {
                    r.get(0)
                })
            })
            .await
            .wrap_err_as_system(
                "Failed to determine the latest database migration version.",
                ADVICE_DB_ERROR,
            )?;

        for (i, migration) in MIGRATIONS.iter().enumerate().skip(latest_migration) {
            self.connection
                .call(move |c| {
                    let transaction = c.transaction()?;
                    transaction.execute(migration, [])?;
                    transaction.execute("INSERT INTO migrations (id) VALUES (?1)", [i + 1])?;

                    transaction.commit()
                })
                .await
                .wrap_err_as_system(
                    format!("Failed to apply database migration v{}.", i + 1),
                    ADVICE_REPORT_DEV,
                )?;
        }

        Ok(())
    }
}

/// SQLite treats a negative LIMIT as "no limit".
fn limit_param(limit: Option<usize>) -> i64 {
    limit.and_then(|l| i64::try_from(l).ok()).unwrap_or(-1)
}

fn query_track_frequencies(
    c: &rusqlite::Connection,
    limit: Option<usize>,
) -> rusqlite::Result<Vec<TrackFrequency>> {
    let mut stmt = c.prepare(
        "SELECT track_id, track_name, artist_name, COUNT(*) AS play_count
        FROM plays
        GROUP BY track_id, track_name, artist_name
        ORDER BY play_count DESC, track_name ASC
        LIMIT ?1",
    )?;

    let rows = stmt.query_map([limit_param(limit)], |r| {
        Ok(TrackFrequency {
            track_id: r.get(0)?,
            track_name: r.get(1)?,
            artist_name: r.get(2)?,
            play_count: r.get(3)?,
        })
    })?;

    let tracks = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(tracks)
}

fn query_artist_frequencies(
    c: &rusqlite::Connection,
    limit: Option<usize>,
) -> rusqlite::Result<Vec<ArtistFrequency>> {
    let mut stmt = c.prepare(
        "SELECT artist_name, COUNT(*) AS play_count
        FROM plays
        GROUP BY artist_name
        ORDER BY play_count DESC, artist_name ASC
        LIMIT ?1",
    )?;

    let rows = stmt.query_map([limit_param(limit)], |r| {
        Ok(ArtistFrequency {
            artist_name: r.get(0)?,
            play_count: r.get(1)?,
        })
    })?;

    let artists = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(artists)
}

#[async_trait::async_trait]
impl PlayEventStore for SqliteDatabase {
    #[instrument("db.sqlite.record_events", skip(self, events), fields(events = events.len()), err(Display))]
    async fn record_events(&self, events: Vec<PlayEvent>) -> Result<usize, errors::Error> {
        if events.is_empty() {
            return Ok(0);
        }

        self.connection
            .call(move |c| {
                let tx = c.transaction()?;
                let mut inserted = 0;

                {
                    let mut stmt = tx.prepare(
                        "INSERT OR IGNORE INTO plays (date_played, time_played, track_id, track_name, artist_name)
                        VALUES (?1, ?2, ?3, ?4, ?5)",
                    )?;

                    for event in events.iter() {
                        inserted += stmt.execute((
                            &event.date,
                            &event.time,
                            &event.track_id,
                            &event.track_name,
                            &event.artist_name,
                        ))?;
                    }
                }

                tx.commit()?;
                Ok::<_, rusqlite::Error>(inserted)
            })
            .await
            .wrap_err_as_system("Failed to record play events.", ADVICE_DB_ERROR)
    }

    #[instrument("db.sqlite.track_frequencies", skip(self), err(Display))]
    async fn track_frequencies(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<TrackFrequency>, errors::Error> {
        self.connection
            .call(move |c| query_track_frequencies(c, limit))
            .await
            .wrap_err_as_system("Failed to read track play frequencies.", ADVICE_DB_ERROR)
    }

    #[instrument("db.sqlite.artist_frequencies", skip(self), err(Display))]
    async fn artist_frequencies(&self) -> Result<Vec<ArtistFrequency>, errors::Error> {
        self.connection
            .call(|c| query_artist_frequencies(c, None))
            .await
            .wrap_err_as_system("Failed to read artist play frequencies.", ADVICE_DB_ERROR)
    }

    #[instrument("db.sqlite.frequency_snapshot", skip(self), err(Display))]
    async fn frequency_snapshot(
        &self,
        limit: Option<usize>,
    ) -> Result<FrequencySnapshot, errors::Error> {
        self.connection
            .call(move |c| {
                let tx = c.transaction()?;
                let tracks = query_track_frequencies(&tx, limit)?;
                let artists = query_artist_frequencies(&tx, None)?;
                tx.commit()?;

                Ok::<_, rusqlite::Error>(FrequencySnapshot { tracks, artists })
            })
            .await
            .wrap_err_as_system("Failed to read play frequencies.", ADVICE_DB_ERROR)
    }

    #[instrument("db.sqlite.statistics", skip(self), err(Display))]
    async fn statistics(&self) -> Result<ListeningStatistics, errors::Error> {
        self.connection
            .call(|c| {
                let tx = c.transaction()?;

                let (total_plays, unique_tracks, unique_artists, first_played, last_played): (
                    usize,
                    usize,
                    usize,
                    Option<NaiveDate>,
                    Option<NaiveDate>,
                ) = tx.query_row(
                        "SELECT COUNT(*), COUNT(DISTINCT track_id), COUNT(DISTINCT artist_name),
                            MIN(date_played), MAX(date_played)
                        FROM plays",
                        [],
                        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
                    )?;

                let most_played_track = query_track_frequencies(&tx, Some(1))?.into_iter().next();
                let most_played_artist =
                    query_artist_frequencies(&tx, Some(1))?.into_iter().next();

                tx.commit()?;

                Ok::<_, rusqlite::Error>(ListeningStatistics {
                    total_plays,
                    unique_tracks,
                    unique_artists,
                    first_played,
                    last_played,
                    most_played_track,
                    most_played_artist,
                })
            })
            .await
            .wrap_err_as_system("Failed to gather listening statistics.", ADVICE_DB_ERROR)
    }

    #[instrument("db.sqlite.delete_before", skip(self), err(Display))]
    async fn delete_before(&self, cutoff: NaiveDate) -> Result<usize, errors::Error> {
        self.connection
            .call(move |c| c.execute("DELETE FROM plays WHERE date_played < ?1", [cutoff]))
            .await
            .wrap_err_as_system("Failed to remove old play events.", ADVICE_DB_ERROR)
    }

    #[instrument("db.sqlite.backup", skip(self), err(Display))]
    async fn backup(&self, path: PathBuf) -> Result<(), errors::Error> {
        let target = path.to_string_lossy().into_owned();

        self.connection
            .call(move |c| c.execute("VACUUM INTO ?1", [target]))
            .await
            .wrap_err_as_user(
                format!("Failed to back up the database to '{}'.", path.display()),
                &[
                    "Make sure that the backup directory exists and is writable.",
                    "Make sure that no file already exists at the backup path.",
                ],
            )?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl KeyValueStore for SqliteDatabase {
    #[instrument("db.sqlite.get", skip(self, partition, key), err(Display))]
    async fn get<
        P: Into<Cow<'static, str>> + Send,
        K: Into<Cow<'static, str>> + Send,
        T: serde::de::DeserializeOwned + Send + 'static,
    >(
        &self,
        partition: P,
        key: K,
    ) -> std::result::Result<Option<T>, errors::Error> {
        let key = key.into();
        let partition = partition.into();

        self.connection
            .call(move |c| {
                c.query_row(
                    "SELECT value FROM kv WHERE partition = ?1 AND key = ?2",
                    [partition, key],
                    |r| {
                        let value: String = r.get(0)?;
                        let deserialized: T = serde_json::from_str(&value).map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(
                                0,
                                rusqlite::types::Type::Text,
                                Box::new(e),
                            )
                        })?;
                        Ok(deserialized)
                    },
                )
                .optional()
            })
            .await
            .map_err_as_system(ADVICE_REPORT_DEV)
    }

    #[instrument("db.sqlite.set", skip(self, partition, key, value), err(Display))]
    async fn set<
        P: Into<Cow<'static, str>> + Send,
        K: Into<Cow<'static, str>> + Send,
        T: serde::Serialize + Send + 'static,
    >(
        &self,
        partition: P,
        key: K,
        value: T,
    ) -> std::result::Result<(), errors::Error> {
        let serialized = serde_json::to_string(&value).wrap_err_as_system(
            "Failed to serialize value for storage in the key/value store.",
            ADVICE_REPORT_DEV,
        )?;

        let partition = partition.into();
        let key = key.into();

        self.connection
            .call(move |c| {
                c.execute(
                    "INSERT INTO kv (partition, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(partition, key) DO UPDATE SET value = excluded.value",
                    (partition, key, serialized),
                )
            })
            .await
            .map_err_as_system(ADVICE_DB_ERROR)?;
        Ok(())
    }

    #[instrument("db.sqlite.remove", skip(self, partition, key), err(Display))]
    async fn remove<P: Into<Cow<'static, str>> + Send, K: Into<Cow<'static, str>> + Send>(
        &self,
        partition: P,
        key: K,
    ) -> std::result::Result<(), errors::Error> {
        let partition = partition.into();
        let key = key.into();

        self.connection
            .call(move |c| {
                c.execute(
                    "DELETE FROM kv WHERE partition = ?1 AND key = ?2",
                    (partition, key),
                )
            })
            .await
            .map_err_as_system(ADVICE_DB_ERROR)?;
        Ok(())
    }
}

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS kv (
        partition TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (partition, key)
    )",
    "CREATE TABLE IF NOT EXISTS plays (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        date_played DATE NOT NULL,
        time_played TIME NOT NULL,
        track_id TEXT NOT NULL,
        track_name TEXT NOT NULL,
        artist_name TEXT NOT NULL,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        UNIQUE (date_played, time_played, track_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_plays_track_id ON plays (track_id)",
    "CREATE INDEX IF NOT EXISTS idx_plays_artist_name ON plays (artist_name)",
    "CREATE INDEX IF NOT EXISTS idx_plays_date_played ON plays (date_played)",
];

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;

    fn play(at: &str, track_id: &str, track_name: &str, artist_name: &str) -> PlayEvent {
        PlayEvent::new(
            DateTime::parse_from_rfc3339(at).unwrap().with_timezone(&Utc),
            track_id,
            track_name,
            artist_name,
        )
    }

    fn history() -> Vec<PlayEvent> {
        vec![
            play("2024-05-01T08:00:00Z", "a", "Alpha", "Artist One"),
            play("2024-05-01T09:00:00Z", "a", "Alpha", "Artist One"),
            play("2024-05-02T10:00:00Z", "a", "Alpha", "Artist One"),
            play("2024-05-02T11:00:00Z", "b", "Bravo", "Artist Two"),
            play("2024-05-03T12:00:00Z", "b", "Bravo", "Artist Two"),
            play("2024-05-03T13:00:00Z", "c", "Charlie", "Artist One"),
            play("2024-05-04T14:00:00Z", "d", "Delta", "Artist Three"),
        ]
    }

    #[tokio::test]
    async fn test_record_events_ignores_duplicates() {
        let db = SqliteDatabase::open_in_memory().await.unwrap();

        assert_eq!(db.record_events(history()).await.unwrap(), 7);
        assert_eq!(
            db.record_events(history()).await.unwrap(),
            0,
            "Re-recording the same batch should insert nothing"
        );

        let mut batch = history();
        batch.push(play("2024-05-05T08:00:00Z", "a", "Alpha", "Artist One"));
        assert_eq!(db.record_events(batch).await.unwrap(), 1);

        let stats = db.statistics().await.unwrap();
        assert_eq!(stats.total_plays, 8);
    }

    #[tokio::test]
    async fn test_record_events_empty_batch() {
        let db = SqliteDatabase::open_in_memory().await.unwrap();
        assert_eq!(db.record_events(Vec::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_key_ignores_other_fields() {
        let db = SqliteDatabase::open_in_memory().await.unwrap();

        db.record_events(vec![play("2024-05-01T08:00:00Z", "a", "Alpha", "Artist One")])
            .await
            .unwrap();
        let inserted = db
            .record_events(vec![play("2024-05-01T08:00:00.500Z", "a", "Alpha (Remastered)", "Artist One")])
            .await
            .unwrap();

        assert_eq!(inserted, 0, "The key is (date, time, track id) at second precision");
    }

    #[tokio::test]
    async fn test_track_frequencies_ordering() {
        let db = SqliteDatabase::open_in_memory().await.unwrap();
        db.record_events(history()).await.unwrap();

        let tracks = db.track_frequencies(None).await.unwrap();
        let summary: Vec<(&str, u32)> = tracks
            .iter()
            .map(|t| (t.track_id.as_str(), t.play_count))
            .collect();

        assert_eq!(summary, vec![("a", 3), ("b", 2), ("c", 1), ("d", 1)]);
        assert_eq!(tracks[0].track_name, "Alpha");
        assert_eq!(tracks[0].artist_name, "Artist One");

        let limited = db.track_frequencies(Some(2)).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[1].track_id, "b");
    }

    #[tokio::test]
    async fn test_artist_frequencies_ordering() {
        let db = SqliteDatabase::open_in_memory().await.unwrap();
        db.record_events(history()).await.unwrap();

        let artists = db.artist_frequencies().await.unwrap();
        let summary: Vec<(&str, u32)> = artists
            .iter()
            .map(|a| (a.artist_name.as_str(), a.play_count))
            .collect();

        assert_eq!(
            summary,
            vec![("Artist One", 4), ("Artist Two", 2), ("Artist Three", 1)]
        );
    }

    #[tokio::test]
    async fn test_empty_store_views() {
        let db = SqliteDatabase::open_in_memory().await.unwrap();

        assert!(db.track_frequencies(None).await.unwrap().is_empty());
        assert!(db.artist_frequencies().await.unwrap().is_empty());
        assert_eq!(
            db.frequency_snapshot(Some(60)).await.unwrap(),
            FrequencySnapshot::default()
        );
        assert_eq!(db.statistics().await.unwrap(), ListeningStatistics::default());
    }

    #[tokio::test]
    async fn test_frequency_snapshot_limits_tracks_only() {
        let db = SqliteDatabase::open_in_memory().await.unwrap();
        db.record_events(history()).await.unwrap();

        let snapshot = db.frequency_snapshot(Some(1)).await.unwrap();
        assert_eq!(snapshot.tracks.len(), 1);
        assert_eq!(snapshot.tracks[0].track_id, "a");
        assert_eq!(snapshot.artists.len(), 3);
    }

    #[tokio::test]
    async fn test_statistics() {
        let db = SqliteDatabase::open_in_memory().await.unwrap();
        db.record_events(history()).await.unwrap();

        let stats = db.statistics().await.unwrap();
        assert_eq!(stats.total_plays, 7);
        assert_eq!(stats.unique_tracks, 4);
        assert_eq!(stats.unique_artists, 3);
        assert_eq!(stats.first_played, NaiveDate::from_ymd_opt(2024, 5, 1));
        assert_eq!(stats.last_played, NaiveDate::from_ymd_opt(2024, 5, 4));
        assert_eq!(stats.most_played_track.unwrap().track_id, "a");
        assert_eq!(stats.most_played_artist.unwrap().artist_name, "Artist One");
    }

    #[tokio::test]
    async fn test_delete_before() {
        let db = SqliteDatabase::open_in_memory().await.unwrap();
        db.record_events(history()).await.unwrap();

        let deleted = db
            .delete_before(NaiveDate::from_ymd_opt(2024, 5, 3).unwrap())
            .await
            .unwrap();
        assert_eq!(deleted, 4);

        let tracks = db.track_frequencies(None).await.unwrap();
        let ids: Vec<&str> = tracks.iter().map(|t| t.track_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_backup_writes_copy() {
        let db = SqliteDatabase::open_in_memory().await.unwrap();
        db.record_events(history()).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.sqlite");
        db.backup(path.clone()).await.unwrap();

        let copy = SqliteDatabase::open(&path).await.unwrap();
        assert_eq!(copy.statistics().await.unwrap().total_plays, 7);

        assert!(
            db.backup(path).await.is_err(),
            "Backing up over an existing file should fail"
        );
    }

    #[tokio::test]
    async fn test_key_value_store_basic() {
        let db = SqliteDatabase::open_in_memory().await.unwrap();

        assert_eq!(
            Option::<String>::None,
            db.get("test_partition", "non_existent_key").await.unwrap()
        );

        db.set("test_partition", "test_key", "test_value")
            .await
            .unwrap();
        let value: String = db.get("test_partition", "test_key").await.unwrap().unwrap();
        assert_eq!(value, "test_value");

        db.set("test_partition", "test_key", "updated").await.unwrap();
        let value: String = db.get("test_partition", "test_key").await.unwrap().unwrap();
        assert_eq!(value, "updated");

        db.remove("test_partition", "test_key").await.unwrap();
        let result: Option<String> = db.get("test_partition", "test_key").await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_reopen_skips_applied_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plays.sqlite");

        {
            let db = SqliteDatabase::open(&path).await.unwrap();
            db.record_events(history()).await.unwrap();
        }

        let db = SqliteDatabase::open(&path).await.unwrap();
        assert_eq!(db.statistics().await.unwrap().total_plays, 7);
    }
}
