use crate::{config::PlaylistConfig, prelude::*, selection::Selection};

const PLAYLIST_PARTITION: &str = "spotify/playlist";

/// The remote playlist operations needed to publish a selection.
#[async_trait::async_trait]
pub trait PlaylistRemote {
    /// Looks up one of the user's playlists by name, ignoring case.
    async fn find_by_name(&self, name: &str) -> Result<Option<String>, human_errors::Error>;

    async fn create(
        &self,
        name: &str,
        public: bool,
        description: Option<&str>,
    ) -> Result<String, human_errors::Error>;

    async fn replace_tracks(
        &self,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), human_errors::Error>;

    async fn add_tracks(
        &self,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), human_errors::Error>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Created { playlist_id: String, tracks: usize },
    Updated { playlist_id: String, tracks: usize },
    Skipped,
}

impl std::fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishOutcome::Created { playlist_id, tracks } => {
                write!(f, "created playlist {playlist_id} with {tracks} tracks")
            }
            PublishOutcome::Updated { playlist_id, tracks } => {
                write!(f, "updated playlist {playlist_id} with {tracks} tracks")
            }
            PublishOutcome::Skipped => write!(f, "skipped publishing an empty selection"),
        }
    }
}

/// Writes a selection into the user's "On Repeat" playlist, creating the playlist
/// the first time and replacing its contents afterwards.
pub struct OnRepeatPublisher<P: PlaylistRemote> {
    account_id: String,
    playlist: PlaylistConfig,
    remote: P,
}

impl<P: PlaylistRemote> OnRepeatPublisher<P> {
    pub fn new(account_id: impl ToString, playlist: PlaylistConfig, remote: P) -> Self {
        Self {
            account_id: account_id.to_string(),
            playlist,
            remote,
        }
    }

    fn cache_key(&self) -> String {
        format!("{}/{}", self.account_id, self.playlist.name)
    }

    #[instrument(
        "publishers.on_repeat.publish",
        skip(self, services, selection),
        fields(playlist = %self.playlist.name, tracks = selection.len()),
        err(Display)
    )]
    pub async fn publish(
        &self,
        services: &impl Services,
        selection: &Selection,
    ) -> Result<PublishOutcome, human_errors::Error> {
        if selection.is_empty() {
            info!("Nothing has been played yet, leaving '{}' untouched.", self.playlist.name);
            return Ok(PublishOutcome::Skipped);
        }

        let cached: Option<String> = services
            .kv()
            .get(PLAYLIST_PARTITION, self.cache_key())
            .await?;

        if let Some(playlist_id) = cached {
            match self.remote.replace_tracks(&playlist_id, &selection.track_ids).await {
                Ok(()) => {
                    return Ok(PublishOutcome::Updated {
                        playlist_id,
                        tracks: selection.len(),
                    });
                }
                Err(err) => {
                    warn!(
                        "Could not update cached playlist {playlist_id}, looking it up again: {err}"
                    );
                    services
                        .kv()
                        .remove(PLAYLIST_PARTITION, self.cache_key())
                        .await?;
                }
            }
        }

        let (playlist_id, outcome) = match self.remote.find_by_name(&self.playlist.name).await? {
            Some(playlist_id) => {
                self.remote
                    .replace_tracks(&playlist_id, &selection.track_ids)
                    .await?;
                let outcome = PublishOutcome::Updated {
                    playlist_id: playlist_id.clone(),
                    tracks: selection.len(),
                };
                (playlist_id, outcome)
            }
            None => {
                let playlist_id = self
                    .remote
                    .create(
                        &self.playlist.name,
                        self.playlist.public,
                        self.playlist.description.as_deref(),
                    )
                    .await?;
                info!("Created playlist '{}' ({playlist_id}).", self.playlist.name);

                self.remote
                    .add_tracks(&playlist_id, &selection.track_ids)
                    .await?;
                let outcome = PublishOutcome::Created {
                    playlist_id: playlist_id.clone(),
                    tracks: selection.len(),
                };
                (playlist_id, outcome)
            }
        };

        services
            .kv()
            .set(PLAYLIST_PARTITION, self.cache_key(), playlist_id)
            .await?;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::testing::mock_services;

    /// An in-memory playlist service which records every call made to it.
    #[derive(Default)]
    struct FakeRemote {
        playlists: Mutex<Vec<(String, String, Vec<String>)>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRemote {
        fn with_playlist(id: &str, name: &str) -> Self {
            let remote = Self::default();
            remote
                .playlists
                .lock()
                .unwrap()
                .push((id.to_string(), name.to_string(), vec!["old".to_string()]));
            remote
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn tracks(&self, id: &str) -> Option<Vec<String>> {
            self.playlists
                .lock()
                .unwrap()
                .iter()
                .find(|(pid, _, _)| pid == id)
                .map(|(_, _, tracks)| tracks.clone())
        }
    }

    #[async_trait::async_trait]
    impl PlaylistRemote for FakeRemote {
        async fn find_by_name(&self, name: &str) -> Result<Option<String>, human_errors::Error> {
            self.calls.lock().unwrap().push(format!("find {name}"));
            Ok(self
                .playlists
                .lock()
                .unwrap()
                .iter()
                .find(|(_, n, _)| n.eq_ignore_ascii_case(name))
                .map(|(id, _, _)| id.clone()))
        }

        async fn create(
            &self,
            name: &str,
            _public: bool,
            _description: Option<&str>,
        ) -> Result<String, human_errors::Error> {
            self.calls.lock().unwrap().push(format!("create {name}"));
            let mut playlists = self.playlists.lock().unwrap();
            let id = format!("p{}", playlists.len() + 1);
            playlists.push((id.clone(), name.to_string(), vec![]));
            Ok(id)
        }

        async fn replace_tracks(
            &self,
            playlist_id: &str,
            track_ids: &[String],
        ) -> Result<(), human_errors::Error> {
            self.calls.lock().unwrap().push(format!("replace {playlist_id}"));
            let mut playlists = self.playlists.lock().unwrap();
            match playlists.iter_mut().find(|(id, _, _)| id == playlist_id) {
                Some((_, _, tracks)) => {
                    *tracks = track_ids.to_vec();
                    Ok(())
                }
                None => Err(human_errors::user(
                    "The requested Spotify resource was not found.",
                    &["Check that the playlist has not been deleted."],
                )),
            }
        }

        async fn add_tracks(
            &self,
            playlist_id: &str,
            track_ids: &[String],
        ) -> Result<(), human_errors::Error> {
            self.calls.lock().unwrap().push(format!("add {playlist_id}"));
            let mut playlists = self.playlists.lock().unwrap();
            if let Some((_, _, tracks)) = playlists.iter_mut().find(|(id, _, _)| id == playlist_id) {
                tracks.extend_from_slice(track_ids);
            }
            Ok(())
        }
    }

    fn selection(ids: &[&str]) -> Selection {
        Selection {
            track_ids: ids.iter().map(|id| id.to_string()).collect(),
            requested: 30,
        }
    }

    #[tokio::test]
    async fn test_creates_missing_playlist() {
        let services = mock_services().await.unwrap();
        let publisher = OnRepeatPublisher::new("user", PlaylistConfig::default(), FakeRemote::default());

        let outcome = publisher.publish(&services, &selection(&["a", "b"])).await.unwrap();

        assert_eq!(
            outcome,
            PublishOutcome::Created {
                playlist_id: "p1".into(),
                tracks: 2
            }
        );
        assert_eq!(publisher.remote.tracks("p1"), Some(vec!["a".to_string(), "b".to_string()]));

        let cached: Option<String> = services
            .kv()
            .get(PLAYLIST_PARTITION, "user/the better On Repeat")
            .await
            .unwrap();
        assert_eq!(cached.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn test_replaces_existing_playlist_found_by_name() {
        let services = mock_services().await.unwrap();
        let remote = FakeRemote::with_playlist("existing", "THE BETTER ON REPEAT");
        let publisher = OnRepeatPublisher::new("user", PlaylistConfig::default(), remote);

        let outcome = publisher.publish(&services, &selection(&["a"])).await.unwrap();

        assert_eq!(
            outcome,
            PublishOutcome::Updated {
                playlist_id: "existing".into(),
                tracks: 1
            }
        );
        assert_eq!(publisher.remote.tracks("existing"), Some(vec!["a".to_string()]));
    }

    #[tokio::test]
    async fn test_uses_cached_playlist_id() {
        let services = mock_services().await.unwrap();
        let publisher = OnRepeatPublisher::new(
            "user",
            PlaylistConfig::default(),
            FakeRemote::with_playlist("existing", "the better On Repeat"),
        );

        publisher.publish(&services, &selection(&["a"])).await.unwrap();
        publisher.publish(&services, &selection(&["b"])).await.unwrap();

        assert_eq!(
            publisher.remote.calls(),
            vec![
                "find the better On Repeat",
                "replace existing",
                "replace existing"
            ]
        );
        assert_eq!(publisher.remote.tracks("existing"), Some(vec!["b".to_string()]));
    }

    #[tokio::test]
    async fn test_stale_cached_id_is_resolved_again() {
        let services = mock_services().await.unwrap();
        services
            .kv()
            .set(PLAYLIST_PARTITION, "user/the better On Repeat", "deleted".to_string())
            .await
            .unwrap();

        let publisher = OnRepeatPublisher::new("user", PlaylistConfig::default(), FakeRemote::default());
        let outcome = publisher.publish(&services, &selection(&["a"])).await.unwrap();

        assert_eq!(
            outcome,
            PublishOutcome::Created {
                playlist_id: "p1".into(),
                tracks: 1
            }
        );
        assert_eq!(
            publisher.remote.calls(),
            vec![
                "replace deleted",
                "find the better On Repeat",
                "create the better On Repeat",
                "add p1"
            ]
        );

        let cached: Option<String> = services
            .kv()
            .get(PLAYLIST_PARTITION, "user/the better On Repeat")
            .await
            .unwrap();
        assert_eq!(cached.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn test_empty_selection_is_skipped() {
        let services = mock_services().await.unwrap();
        let publisher = OnRepeatPublisher::new("user", PlaylistConfig::default(), FakeRemote::default());

        let outcome = publisher.publish(&services, &selection(&[])).await.unwrap();

        assert_eq!(outcome, PublishOutcome::Skipped);
        assert!(publisher.remote.calls().is_empty());
    }
}
