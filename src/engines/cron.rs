use chrono::Utc;

use crate::prelude::*;

/// Runs `callback` every time `cron` fires, forever. A failing run is logged and
/// does not stop the schedule.
pub async fn cron<S, F>(
    name: impl ToString,
    cron: croner::Cron,
    services: S,
    callback: F,
) -> Result<(), human_errors::Error>
where
    S: Services + Clone,
    F: AsyncFn(S) -> Result<(), human_errors::Error>,
{
    let name = name.to_string();

    loop {
        let next = cron.find_next_occurrence(&Utc::now(), false).wrap_err_as_user(
            format!("Your cron expression '{cron}' never fires again."),
            &["Set 'schedule.cron' to a recurring schedule such as '*/30 * * * *'."],
        )?;

        // The clock may already have passed `next` by the time we get here.
        let wait = next
            .signed_duration_since(Utc::now())
            .to_std()
            .unwrap_or_default();
        debug!("Waiting {wait:?} until next cron job for '{name}' at {next} ({cron})...");
        tokio::time::sleep(wait).await;

        debug!("Running cron job '{name}' scheduled for {next}...");
        let span = info_span!("cron.run", cron.job = name.as_str(), cron.spec = %cron);
        if let Err(err) = callback(services.clone()).instrument(span).await {
            error!(error = %err, "An error occurred while running cron job '{name}': {err}");
        } else {
            info!("Cron job '{name}' completed.");
        }
    }
}
