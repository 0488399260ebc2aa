use oauth2::TokenResponse;
use serde::{Deserialize, Serialize};

use crate::{config::SpotifyConfig, prelude::*};

const ADVICE_MISSING_CREDENTIALS: &[&str] = &[
    "Set 'spotify.client_id', 'spotify.client_secret' and 'spotify.refresh_token' in your configuration file.",
    "Alternatively provide them through the SPOTIFY_CLIENT_ID, SPOTIFY_CLIENT_SECRET and SPOTIFY_REFRESH_TOKEN environment variables.",
];

const PROVIDER: &str = "spotify";

#[derive(Clone)]
pub struct OAuth2Config {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
}

impl OAuth2Config {
    pub fn for_spotify(config: &SpotifyConfig) -> Result<Self, human_errors::Error> {
        let client_id = config.client_id.clone().ok_or_else(|| {
            human_errors::user(
                "No Spotify client ID has been configured.",
                ADVICE_MISSING_CREDENTIALS,
            )
        })?;
        let client_secret = config.client_secret.clone().ok_or_else(|| {
            human_errors::user(
                "No Spotify client secret has been configured.",
                ADVICE_MISSING_CREDENTIALS,
            )
        })?;

        Ok(Self {
            client_id,
            client_secret,
            auth_url: config.auth_url.clone(),
            token_url: config.token_url.clone(),
        })
    }

    /// Returns `token_entry` unchanged while it is still fresh, otherwise exchanges
    /// its refresh token for a new access token.
    #[instrument("oauth.get_access_token", skip(self, token_entry), fields(provider = PROVIDER), err(Display))]
    pub async fn get_access_token(
        &self,
        token_entry: &OAuth2RefreshToken,
    ) -> Result<OAuth2RefreshToken, human_errors::Error> {
        if !token_entry.needs_refresh() {
            return Ok(token_entry.clone());
        }

        let client = oauth2::basic::BasicClient::new(oauth2::ClientId::new(self.client_id.clone()))
            .set_client_secret(oauth2::ClientSecret::new(self.client_secret.clone()))
            .set_auth_uri(oauth2::AuthUrl::new(self.auth_url.clone()).map_err_as_user(&[
                "Check that 'spotify.auth_url' in your configuration is a valid URL.",
            ])?)
            .set_token_uri(oauth2::TokenUrl::new(self.token_url.clone()).map_err_as_user(&[
                "Check that 'spotify.token_url' in your configuration is a valid URL.",
            ])?);

        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err_as_system(&["Report this issue to the development team on GitHub."])?;

        let token_result = client
            .exchange_refresh_token(&oauth2::RefreshToken::new(
                token_entry.refresh_token.clone(),
            ))
            .request_async(&http_client)
            .await
            .wrap_err_as_user(
                format!("Failed to refresh OAuth access token for {PROVIDER}."),
                &[
                    "Ensure that your OAuth credentials are correct.",
                    "Check your network connection.",
                    "If the refresh token was revoked, authorize the application again and update 'spotify.refresh_token'.",
                ],
            )?;

        debug!("Refreshed the {PROVIDER} access token.");

        Ok(OAuth2RefreshToken {
            access_token: token_result.access_token().secret().to_string(),
            refresh_token: token_result
                .refresh_token()
                .map(|t| t.secret().to_string())
                .unwrap_or(token_entry.refresh_token.clone()),
            expires_at: chrono::Utc::now()
                + chrono::Duration::seconds(
                    token_result
                        .expires_in()
                        .unwrap_or(std::time::Duration::from_secs(3600))
                        .as_secs() as i64,
                ),
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OAuth2RefreshToken {
    access_token: String,
    refresh_token: String,
    expires_at: chrono::DateTime<chrono::Utc>,
}

impl OAuth2RefreshToken {
    /// A token entry that only knows its refresh token and so must be refreshed before use.
    pub fn from_refresh_token(refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: String::new(),
            refresh_token: refresh_token.into(),
            expires_at: chrono::DateTime::<chrono::Utc>::from(std::time::UNIX_EPOCH),
        }
    }

    #[cfg(test)]
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    pub fn needs_refresh(&self) -> bool {
        chrono::Utc::now() + chrono::Duration::minutes(5) >= self.expires_at
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

}
