use std::path::{Path, PathBuf};

use chrono::{DateTime, Days, Local, Utc};

use crate::{db::PlayEventStore, prelude::*};

/// Removes every play recorded more than `days` days before today (UTC).
#[instrument("workflows.maintenance.purge_older_than", skip(services), err(Display))]
pub async fn purge_older_than(services: &impl Services, days: u32) -> Result<usize, human_errors::Error> {
    purge_before(services, Utc::now(), days).await
}

async fn purge_before(
    services: &impl Services,
    now: DateTime<Utc>,
    days: u32,
) -> Result<usize, human_errors::Error> {
    let cutoff = now
        .date_naive()
        .checked_sub_days(Days::new(days as u64))
        .ok_or_else(|| {
            human_errors::user(
                format!("A retention period of {days} days reaches too far into the past."),
                &["Choose a smaller number of days to keep."],
            )
        })?;

    let deleted = services.store().delete_before(cutoff).await?;
    if deleted > 0 {
        info!("Removed {deleted} plays from before {cutoff}.");
    } else {
        debug!("No plays from before {cutoff} needed to be removed.");
    }

    Ok(deleted)
}

pub fn default_backup_path(dir: &Path, now: DateTime<Local>) -> PathBuf {
    dir.join(format!(
        "on_repeat_backup_{}.sqlite",
        now.format("%Y%m%d_%H%M%S")
    ))
}

/// Writes a copy of the database to `output`, or to a timestamped file in the
/// configured backup directory, and returns where it was written.
#[instrument("workflows.maintenance.backup", skip(services), err(Display))]
pub async fn backup(
    services: &impl Services,
    output: Option<PathBuf>,
) -> Result<PathBuf, human_errors::Error> {
    let path = match output {
        Some(path) => path,
        None => default_backup_path(&services.config().database.backup_dir, Local::now()),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.wrap_err_as_user(
            format!("We could not create the backup directory '{}'.", parent.display()),
            &["Check that you have permission to write to this location."],
        )?;
    }

    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(human_errors::user(
            format!("A file already exists at '{}'.", path.display()),
            &["Choose a different output path or remove the existing file."],
        ));
    }

    services.store().backup(path.clone()).await?;
    info!("Backed up the database to '{}'.", path.display());

    Ok(path)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone};

    use super::*;
    use crate::{config::Config, db::PlayEvent, services::ServicesContainer, testing::mock_services};

    fn play_on(date: NaiveDate, track_id: &str) -> PlayEvent {
        PlayEvent {
            date,
            time: chrono::NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            track_id: track_id.to_string(),
            track_name: format!("Track {track_id}"),
            artist_name: "Artist".to_string(),
        }
    }

    #[tokio::test]
    async fn test_purge_before_cutoff() {
        let services = mock_services().await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 30, 8, 0, 0).unwrap();

        services
            .store()
            .record_events(vec![
                play_on(NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(), "old"),
                play_on(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(), "boundary"),
                play_on(NaiveDate::from_ymd_opt(2024, 6, 29).unwrap(), "recent"),
            ])
            .await
            .unwrap();

        let deleted = purge_before(&services, now, 90).await.unwrap();
        assert_eq!(deleted, 1);

        let remaining: Vec<String> = services
            .store()
            .track_frequencies(None)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.track_id)
            .collect();
        assert_eq!(remaining.len(), 2);
        assert!(!remaining.contains(&"old".to_string()));
    }

    #[tokio::test]
    async fn test_purge_with_huge_retention_is_rejected() {
        let services = mock_services().await.unwrap();

        let err = purge_older_than(&services, u32::MAX).await.err().unwrap();
        assert!(err.to_string().contains("too far into the past"));
    }

    #[test]
    fn test_default_backup_path() {
        let now = Local.with_ymd_and_hms(2024, 5, 1, 21, 14, 7).unwrap();

        assert_eq!(
            default_backup_path(Path::new("backups"), now),
            PathBuf::from("backups/on_repeat_backup_20240501_211407.sqlite")
        );
    }

    #[tokio::test]
    async fn test_backup_into_configured_directory() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.backup_dir = temp.path().join("nested").join("backups");

        let services = ServicesContainer::new_mock_with_config(config).await.unwrap();
        services
            .store()
            .record_events(vec![play_on(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(), "t1")])
            .await
            .unwrap();

        let path = backup(&services, None).await.unwrap();

        assert!(path.starts_with(temp.path().join("nested").join("backups")));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_backup_refuses_to_overwrite() {
        let temp = tempfile::tempdir().unwrap();
        let output = temp.path().join("copy.sqlite");
        std::fs::write(&output, b"existing").unwrap();

        let services = mock_services().await.unwrap();
        let err = backup(&services, Some(output.clone())).await.err().unwrap();

        assert!(err.to_string().contains("already exists"));
        assert_eq!(std::fs::read(&output).unwrap(), b"existing");
    }
}
