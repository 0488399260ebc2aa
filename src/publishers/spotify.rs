use std::borrow::Cow;

use chrono::{DateTime, Utc};

use crate::{
    collectors::{ListeningHistory, PlayedItem},
    oauth::OAuth2Config,
    prelude::*,
    publishers::PlaylistRemote,
};

/// Spotify refuses to add or replace more than this many tracks in one request.
const MAX_TRACKS_PER_REQUEST: usize = 100;

const ADVICE_CONNECTIVITY: &[&str] = &[
    "Ensure that your internet connection is working.",
    "Check that Spotify's service is operational.",
];

const ADVICE_REPORT: &[&str] = &["Report this issue to the development team on GitHub."];

#[derive(Clone)]
pub struct SpotifyClient {
    pub api_endpoint: String,
    access_token: OAuth2RefreshToken,
    client: reqwest::Client,
}

impl SpotifyClient {
    pub fn new_with_url(url: impl ToString, access_token: OAuth2RefreshToken) -> Self {
        SpotifyClient {
            api_endpoint: url.to_string().trim_end_matches('/').to_string(),
            access_token,

            client: reqwest::Client::new(),
        }
    }

    /// Builds a client for the configured account, refreshing its access token if necessary.
    pub async fn connect(services: &impl Services) -> Result<Self, human_errors::Error> {
        let token = Self::renew_access_token(services).await?;
        Ok(Self::new_with_url(&services.config().spotify.api_url, token))
    }

    pub async fn get_current_user(&self) -> Result<SpotifyUser, human_errors::Error> {
        let user: SpotifyUser = self
            .call_spotify(reqwest::Method::GET, "me", None::<()>)
            .await?;

        Ok(user)
    }

    #[instrument("publishers.spotify.get_recently_played", skip(self), err(Display))]
    pub async fn get_recently_played(
        &self,
        limit: usize,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<PlayedItem>, human_errors::Error> {
        let mut path = format!("me/player/recently-played?limit={limit}");
        if let Some(after) = after {
            path.push_str(&format!("&after={}", after.timestamp_millis()));
        }

        let history: SpotifyCursorPage<SpotifyPlayHistory> = self
            .call_spotify(reqwest::Method::GET, path, None::<()>)
            .await?;

        let mut items = Vec::with_capacity(history.items.len());
        for entry in history.items {
            // Local files have no Spotify id and cannot be added to playlists.
            let Some(track_id) = entry.track.id else {
                debug!("Skipping '{}' as it has no track id.", entry.track.name);
                continue;
            };

            let artist_name = entry
                .track
                .artists
                .into_iter()
                .next()
                .map(|a| a.name)
                .unwrap_or_else(|| "Unknown Artist".to_string());

            items.push(PlayedItem {
                played_at: entry.played_at,
                track_id,
                track_name: entry.track.name,
                artist_name,
            });
        }

        Ok(items)
    }

    pub async fn get_playlists(&self) -> Result<Vec<SpotifyPlaylist>, human_errors::Error> {
        self.call_spotify_paginated(reqwest::Method::GET, "me/playlists?limit=50")
            .await
    }

    pub async fn create_playlist(
        &self,
        name: impl ToString,
        public: bool,
        collaborative: bool,
        description: Option<String>,
    ) -> Result<SpotifyPlaylist, human_errors::Error> {
        let user = self.get_current_user().await?;

        let playlist: SpotifyPlaylist = self
            .call_spotify(
                reqwest::Method::POST,
                format!("users/{}/playlists", user.id),
                Some(serde_json::json!({
                    "name": name.to_string(),
                    "public": public,
                    "collaborative": collaborative,
                    "description": description,
                })),
            )
            .await?;

        Ok(playlist)
    }

    /// Replaces the playlist's contents with `track_uris`. The first batch replaces
    /// the existing tracks and any further batches are appended.
    pub async fn replace_playlist_tracks(
        &self,
        playlist_id: impl ToString,
        track_uris: Vec<String>,
    ) -> Result<(), human_errors::Error> {
        let playlist_id = playlist_id.to_string();
        let mut chunks = track_uris.chunks(MAX_TRACKS_PER_REQUEST);

        let first = chunks.next().unwrap_or_default();
        let _: serde::de::IgnoredAny = self
            .call_spotify(
                reqwest::Method::PUT,
                format!("playlists/{playlist_id}/tracks"),
                Some(serde_json::json!({ "uris": first })),
            )
            .await?;

        for chunk in chunks {
            self.post_tracks(&playlist_id, chunk).await?;
        }

        Ok(())
    }

    pub async fn add_tracks_to_playlist(
        &self,
        playlist_id: impl ToString,
        track_uris: Vec<String>,
    ) -> Result<(), human_errors::Error> {
        let playlist_id = playlist_id.to_string();
        for chunk in track_uris.chunks(MAX_TRACKS_PER_REQUEST) {
            self.post_tracks(&playlist_id, chunk).await?;
        }

        Ok(())
    }

    async fn post_tracks(&self, playlist_id: &str, track_uris: &[String]) -> Result<(), human_errors::Error> {
        let _: serde::de::IgnoredAny = self
            .call_spotify(
                reqwest::Method::POST,
                format!("playlists/{playlist_id}/tracks"),
                Some(serde_json::json!({ "uris": track_uris })),
            )
            .await?;

        Ok(())
    }

    async fn call_spotify_paginated<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: impl Into<Cow<'_, str>>,
    ) -> Result<Vec<T>, human_errors::Error> {
        let mut results = Vec::new();
        let mut url = path.into().to_string();

        loop {
            let resp: PaginatedResponse<T> = self.call_spotify(method.clone(), url, None::<()>).await?;
            results.extend(resp.items);

            if let Some(next) = resp.next {
                url = next;
            } else {
                break;
            }
        }

        Ok(results)
    }

    async fn call_spotify<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: impl Into<Cow<'_, str>>,
        json: Option<impl Serialize>,
    ) -> Result<T, human_errors::Error> {
        let access_token = self.access_token.access_token();

        let path = path.into();
        let url = if path.starts_with(&self.api_endpoint) {
            path.into_owned()
        } else {
            format!("{}/{}", self.api_endpoint, path)
        };

        let req = self.client.request(method, url).bearer_auth(access_token);

        let req = if let Some(json) = json {
            req.json(&json)
        } else {
            req
        };

        let req = req.build().map_err_as_system(ADVICE_REPORT)?;

        let resp = self
            .client
            .execute(req)
            .await
            .wrap_err_as_user("We could not reach Spotify's API.", ADVICE_CONNECTIVITY)?;

        let resp = check_status(resp)?;

        resp.json()
            .await
            .wrap_err_as_user("Spotify returned a response we could not understand.", ADVICE_CONNECTIVITY)
    }

    /// Returns an access token for the configured refresh token, reusing the one
    /// cached in the key/value store until it is about to expire.
    #[instrument("publishers.spotify.renew_access_token", skip(services), err(Display))]
    pub async fn renew_access_token(
        services: &impl Services,
    ) -> Result<OAuth2RefreshToken, human_errors::Error> {
        let config = services.config();
        let refresh_token = config.spotify.refresh_token.clone().ok_or_else(|| {
            human_errors::user(
                "No Spotify refresh token has been configured.",
                &[
                    "Set 'spotify.refresh_token' in your configuration file or the SPOTIFY_REFRESH_TOKEN environment variable.",
                ],
            )
        })?;

        let oauth = OAuth2Config::for_spotify(&config.spotify)?;

        let cache_key = sha256::digest(refresh_token.as_str());
        let cached: Option<OAuth2RefreshToken> =
            services.kv().get("spotify/token", cache_key.clone()).await?;
        let entry = cached.unwrap_or_else(|| OAuth2RefreshToken::from_refresh_token(refresh_token));

        let token = oauth.get_access_token(&entry).await?;
        if token.access_token() != entry.access_token() {
            services
                .kv()
                .set("spotify/token", cache_key, token.clone())
                .await?;
        }

        Ok(token)
    }
}

/// Maps Spotify's error responses onto errors which explain what the user can do about them.
fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, human_errors::Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    match status {
        reqwest::StatusCode::UNAUTHORIZED => Err(human_errors::user(
            "Spotify rejected our credentials because the authentication has expired.",
            &[
                "Run the command again so that a new access token is requested.",
                "If this keeps happening, authorize the application again and update 'spotify.refresh_token'.",
            ],
        )),
        reqwest::StatusCode::FORBIDDEN => Err(human_errors::user(
            "Spotify denied permission to perform this operation.",
            &[
                "Make sure that your refresh token was issued with the 'user-read-recently-played', 'playlist-read-private', 'playlist-modify-public' and 'playlist-modify-private' scopes.",
                "Check that the playlist belongs to the account you are signed in with.",
            ],
        )),
        reqwest::StatusCode::NOT_FOUND => Err(human_errors::user(
            "The requested Spotify resource was not found.",
            &["Check that the playlist has not been deleted."],
        )),
        reqwest::StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(|v| format!(" (retry after {v} seconds)"))
                .unwrap_or_default();

            Err(human_errors::user(
                format!("Spotify's rate limit was exceeded{retry_after}."),
                &["Wait for a while before running this again.", "Consider running less frequently."],
            ))
        }
        status if status.is_server_error() => Err(human_errors::user(
            format!("Spotify is temporarily unavailable (HTTP {status})."),
            &["Try again in a few minutes.", "Check that Spotify's service is operational."],
        )),
        status => Err(human_errors::user(
            format!("Spotify's API returned an unexpected error (HTTP {status})."),
            ADVICE_CONNECTIVITY,
        )),
    }
}

#[async_trait::async_trait]
impl ListeningHistory for SpotifyClient {
    async fn recently_played(
        &self,
        limit: usize,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<PlayedItem>, human_errors::Error> {
        self.get_recently_played(limit, after).await
    }
}

fn track_uris(track_ids: &[String]) -> Vec<String> {
    track_ids
        .iter()
        .map(|id| format!("spotify:track:{id}"))
        .collect()
}

#[async_trait::async_trait]
impl PlaylistRemote for SpotifyClient {
    async fn find_by_name(&self, name: &str) -> Result<Option<String>, human_errors::Error> {
        let name = name.to_lowercase();
        Ok(self
            .get_playlists()
            .await?
            .into_iter()
            .find(|p| p.name.to_lowercase() == name)
            .map(|p| p.id))
    }

    async fn create(
        &self,
        name: &str,
        public: bool,
        description: Option<&str>,
    ) -> Result<String, human_errors::Error> {
        let playlist = self
            .create_playlist(name, public, false, description.map(str::to_string))
            .await?;
        Ok(playlist.id)
    }

    async fn replace_tracks(
        &self,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), human_errors::Error> {
        self.replace_playlist_tracks(playlist_id, track_uris(track_ids))
            .await
    }

    async fn add_tracks(
        &self,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), human_errors::Error> {
        self.add_tracks_to_playlist(playlist_id, track_uris(track_ids))
            .await
    }
}

#[derive(Deserialize)]
struct PaginatedResponse<T> {
    items: Vec<T>,
    next: Option<String>,
}

#[derive(Deserialize)]
struct SpotifyCursorPage<T> {
    items: Vec<T>,
}

#[derive(Deserialize)]
pub struct SpotifyUser {
    pub id: String,
}

#[derive(Deserialize)]
pub struct SpotifyPlayHistory {
    pub played_at: DateTime<Utc>,
    pub track: SpotifyTrack,
}

#[derive(Deserialize)]
pub struct SpotifyTrack {
    pub id: Option<String>,
    pub name: String,

    #[serde(default)]
    pub artists: Vec<SpotifyArtist>,
}

#[derive(Deserialize)]
pub struct SpotifyArtist {
    pub name: String,
}

#[derive(Deserialize)]
pub struct SpotifyPlaylist {
    pub id: String,
    pub name: String,
}
