use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    collectors::{IngestReport, RecentlyPlayedCollector},
    db::{FrequencySnapshot, PlayEventStore, TrackFrequency},
    prelude::*,
    publishers::{OnRepeatPublisher, PublishOutcome, SpotifyClient},
    selection::{Selection, candidate_limit, select_tracks},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub ingested: IngestReport,
    pub purged: usize,
    pub selection: Selection,
    pub outcome: PublishOutcome,
}

/// Ingests the latest listening history and republishes the "On Repeat" playlist.
pub struct OnRepeatWorkflow;

impl OnRepeatWorkflow {
    #[instrument("workflows.on_repeat.run", skip(services), err(Display))]
    pub async fn run(services: &impl Services) -> Result<RunReport, human_errors::Error> {
        let config = services.config();

        let client = SpotifyClient::connect(services).await?;
        let user = client.get_current_user().await?;

        let ingested = RecentlyPlayedCollector::new(&user.id, config.history.limit, client.clone())
            .ingest(services)
            .await?;

        let purged = match config.retention.days {
            Some(days) => crate::workflows::maintenance::purge_older_than(services, days).await?,
            None => 0,
        };

        let mut rng = StdRng::from_os_rng();
        let selection = Self::select_playlist(services, config.playlist.size, &mut rng).await?;

        let outcome = OnRepeatPublisher::new(&user.id, config.playlist.clone(), client)
            .publish(services, &selection)
            .await?;
        info!("Finished updating '{}': {outcome}.", config.playlist.name);

        Ok(RunReport {
            ingested,
            purged,
            selection,
            outcome,
        })
    }

    /// Fetches and stores new plays without touching the playlist.
    #[instrument("workflows.on_repeat.ingest", skip(services), err(Display))]
    pub async fn ingest(services: &impl Services) -> Result<IngestReport, human_errors::Error> {
        let client = SpotifyClient::connect(services).await?;
        let user = client.get_current_user().await?;

        RecentlyPlayedCollector::new(&user.id, services.config().history.limit, client)
            .ingest(services)
            .await
    }

    #[instrument("workflows.on_repeat.select_playlist", skip(services, rng), err(Display))]
    pub async fn select_playlist<R: Rng + ?Sized>(
        services: &impl Services,
        size: usize,
        rng: &mut R,
    ) -> Result<Selection, human_errors::Error> {
        let snapshot = Self::snapshot(services, size).await?;
        Ok(Self::select_from(&snapshot, size, rng))
    }

    /// Runs the selection and returns the chosen tracks with their play counts.
    pub async fn preview<R: Rng + ?Sized>(
        services: &impl Services,
        size: usize,
        rng: &mut R,
    ) -> Result<Vec<TrackFrequency>, human_errors::Error> {
        let snapshot = Self::snapshot(services, size).await?;
        let selection = Self::select_from(&snapshot, size, rng);

        Ok(selection
            .track_ids
            .iter()
            .filter_map(|id| snapshot.tracks.iter().find(|t| &t.track_id == id).cloned())
            .collect())
    }

    async fn snapshot(
        services: &impl Services,
        size: usize,
    ) -> Result<FrequencySnapshot, human_errors::Error> {
        services
            .store()
            .frequency_snapshot(Some(candidate_limit(size)))
            .await
    }

    fn select_from<R: Rng + ?Sized>(snapshot: &FrequencySnapshot, size: usize, rng: &mut R) -> Selection {
        let selection = select_tracks(size, &snapshot.tracks, &snapshot.artists, rng);

        if selection.shortfall() > 0 {
            warn!(
                "Only {} of the {} requested tracks could be selected, listen to some more music!",
                selection.len(),
                selection.requested
            );
        }

        selection
    }
}
