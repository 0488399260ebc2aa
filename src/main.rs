use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rand::{SeedableRng, rngs::StdRng};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod collectors;
mod config;
mod db;
mod engines;
mod oauth;
mod prelude;
mod publishers;
mod selection;
mod services;
mod workflows;

#[cfg(test)]
mod testing;

use crate::prelude::*;
use crate::services::ServicesContainer;
use crate::workflows::{OnRepeatWorkflow, maintenance};

#[derive(Parser)]
#[command(name = "on-repeat", version, about = clap::crate_description!())]
struct Cli {
    /// Path to the configuration file (defaults to ./on-repeat.toml when present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest your recent plays and update the playlist once.
    Run,
    /// Keep running on the configured cron schedule.
    Watch,
    /// Only ingest your recent plays.
    Ingest,
    /// Show which tracks would be selected, without publishing them.
    Preview {
        #[arg(long)]
        size: Option<usize>,
        /// Seed the random tie-break to get a reproducible preview.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Show statistics about your listening history.
    Stats,
    /// List your most played tracks.
    TopTracks {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// List your most played artists.
    TopArtists {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Remove plays older than the given number of days.
    Cleanup {
        #[arg(short, long, default_value_t = 90)]
        days: u32,
    },
    /// Write a copy of the database.
    Backup {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "on_repeat=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), human_errors::Error> {
    let config = Config::discover(cli.config.as_deref())?.with_env_overrides();
    let database = db::SqliteDatabase::open(&config.database.path).await?;
    let services = ServicesContainer::new(database, config);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let report = OnRepeatWorkflow::run(&services).await?;
            println!(
                "Recorded {} new plays and {}.",
                report.ingested.inserted, report.outcome
            );
        }
        Command::Watch => {
            let schedule = services.config().schedule.parse()?;
            info!("Updating the playlist on the schedule '{schedule}'.");
            engines::cron("on-repeat", schedule, services, async |services| {
                OnRepeatWorkflow::run(&services).await.map(|_| ())
            })
            .await?;
        }
        Command::Ingest => {
            let report = OnRepeatWorkflow::ingest(&services).await?;
            println!(
                "Fetched {} plays, {} of which were new.",
                report.fetched, report.inserted
            );
        }
        Command::Preview { size, seed } => {
            let size = size.unwrap_or(services.config().playlist.size);
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };

            let tracks = OnRepeatWorkflow::preview(&services, size, &mut rng).await?;
            for (i, track) in tracks.iter().enumerate() {
                println!(
                    "{:>3}. {} - {} ({} plays)",
                    i + 1,
                    track.artist_name,
                    track.track_name,
                    track.play_count
                );
            }
        }
        Command::Stats => {
            let stats = services.store().statistics().await?;
            println!("Total plays:    {}", stats.total_plays);
            println!("Unique tracks:  {}", stats.unique_tracks);
            println!("Unique artists: {}", stats.unique_artists);
            if let (Some(first), Some(last)) = (stats.first_played, stats.last_played) {
                println!("Date range:     {first} to {last}");
            }
            if let Some(track) = stats.most_played_track {
                println!(
                    "Top track:      {} - {} ({} plays)",
                    track.artist_name, track.track_name, track.play_count
                );
            }
            if let Some(artist) = stats.most_played_artist {
                println!(
                    "Top artist:     {} ({} plays)",
                    artist.artist_name, artist.play_count
                );
            }
        }
        Command::TopTracks { limit } => {
            for (i, track) in services
                .store()
                .track_frequencies(Some(limit))
                .await?
                .iter()
                .enumerate()
            {
                println!(
                    "{:>3}. {} - {} ({} plays)",
                    i + 1,
                    track.artist_name,
                    track.track_name,
                    track.play_count
                );
            }
        }
        Command::TopArtists { limit } => {
            for (i, artist) in services
                .store()
                .artist_frequencies()
                .await?
                .iter()
                .take(limit)
                .enumerate()
            {
                println!("{:>3}. {} ({} plays)", i + 1, artist.artist_name, artist.play_count);
            }
        }
        Command::Cleanup { days } => {
            let deleted = maintenance::purge_older_than(&services, days).await?;
            println!("Removed {deleted} plays older than {days} days.");
        }
        Command::Backup { output } => {
            let path = maintenance::backup(&services, output).await?;
            println!("Backed up the database to '{}'.", path.display());
        }
    }

    Ok(())
}
