use std::borrow::Cow;

use chrono::{DateTime, Utc};

use crate::{
    collectors::IncrementalCollector,
    db::{PlayEvent, PlayEventStore},
    prelude::*,
};

/// One entry of a user's listening history as reported by the streaming service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayedItem {
    pub played_at: DateTime<Utc>,
    pub track_id: String,
    pub track_name: String,
    pub artist_name: String,
}

impl From<&PlayedItem> for PlayEvent {
    fn from(item: &PlayedItem) -> Self {
        PlayEvent::new(
            item.played_at,
            item.track_id.clone(),
            item.track_name.clone(),
            item.artist_name.clone(),
        )
    }
}

#[async_trait::async_trait]
pub trait ListeningHistory {
    /// Returns up to `limit` of the most recently played items, restricted to those
    /// played after `after` when it is given.
    async fn recently_played(
        &self,
        limit: usize,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<PlayedItem>, human_errors::Error>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub fetched: usize,
    pub inserted: usize,
}

pub struct RecentlyPlayedCollector<H: ListeningHistory> {
    account_id: String,
    limit: usize,
    history: H,
}

impl<H: ListeningHistory> RecentlyPlayedCollector<H> {
    pub fn new(account_id: impl ToString, limit: usize, history: H) -> Self {
        Self {
            account_id: account_id.to_string(),
            limit,
            history,
        }
    }

    /// Fetches everything played since the last ingestion and records it, only
    /// advancing the watermark once the events have been stored.
    #[instrument("collectors.recently_played.ingest", skip(self, services), fields(account = %self.account_id), err(Display))]
    pub async fn ingest(&self, services: &impl Services) -> Result<IngestReport, human_errors::Error> {
        let items = self.fetch(services).await?;
        if items.is_empty() {
            info!("No new plays since the last ingestion.");
            return Ok(IngestReport::default());
        }

        let events: Vec<PlayEvent> = items.iter().map(PlayEvent::from).collect();
        let inserted = services.store().record_events(events).await?;
        self.advance(services, &items).await?;

        info!(
            "Recorded {inserted} new plays ({} fetched).",
            items.len()
        );

        Ok(IngestReport {
            fetched: items.len(),
            inserted,
        })
    }
}

impl<H: ListeningHistory> IncrementalCollector for RecentlyPlayedCollector<H> {
    type Item = PlayedItem;
    type Watermark = DateTime<Utc>;

    fn kind(&self) -> &'static str {
        "spotify/recently-played"
    }

    fn key(&self) -> Cow<'static, str> {
        Cow::Owned(self.account_id.clone())
    }

    fn watermark(&self, item: &PlayedItem) -> DateTime<Utc> {
        item.played_at
    }

    #[instrument("collectors.recently_played.fetch_since", skip(self), err(Display))]
    async fn fetch_since(
        &self,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<Vec<PlayedItem>, human_errors::Error> {
        let items = self.history.recently_played(self.limit, watermark).await?;

        Ok(match watermark {
            Some(watermark) => items
                .into_iter()
                .filter(|item| item.played_at > watermark)
                .collect(),
            None => items,
        })
    }
}
