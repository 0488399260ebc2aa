use std::path::PathBuf;

use crate::{config::Config, db::SqliteDatabase, services::ServicesContainer};

pub fn get_test_file_path<P: AsRef<str>>(name: P) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name.as_ref())
}

pub fn get_test_file_contents<P: AsRef<str>>(name: P) -> String {
    let path = get_test_file_path(name.as_ref());
    std::fs::read_to_string(&path)
        .unwrap_or_else(|_| panic!("Failed to read test file '{}'", path.display()))
}

pub async fn mock_services() -> Result<ServicesContainer<SqliteDatabase>, human_errors::Error> {
    ServicesContainer::new_mock().await
}

/// Services whose Spotify endpoints all point at `server_uri`, with credentials set.
pub async fn mock_services_for(
    server_uri: &str,
) -> Result<ServicesContainer<SqliteDatabase>, human_errors::Error> {
    let mut config = Config::default();
    config.spotify.api_url = server_uri.to_string();
    config.spotify.auth_url = format!("{server_uri}/authorize");
    config.spotify.token_url = format!("{server_uri}/api/token");
    config.spotify.client_id = Some("client-id".into());
    config.spotify.client_secret = Some("client-secret".into());
    config.spotify.refresh_token = Some("refresh-token".into());

    ServicesContainer::new_mock_with_config(config).await
}
