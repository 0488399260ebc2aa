use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};

/// A single observation of a track being played.
///
/// Events are immutable once recorded and are unique on `(date, time, track_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayEvent {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub track_id: String,
    pub track_name: String,
    pub artist_name: String,
}

impl PlayEvent {
    /// Splits `played_at` into a UTC date and a time of day truncated to whole seconds,
    /// so repeated fetches of the same play always produce the same key.
    pub fn new(
        played_at: DateTime<Utc>,
        track_id: impl Into<String>,
        track_name: impl Into<String>,
        artist_name: impl Into<String>,
    ) -> Self {
        let time = played_at.time();

        Self {
            date: played_at.date_naive(),
            time: time.with_nanosecond(0).unwrap_or(time),
            track_id: track_id.into(),
            track_name: track_name.into(),
            artist_name: artist_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFrequency {
    pub track_id: String,
    pub track_name: String,
    pub artist_name: String,
    pub play_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtistFrequency {
    pub artist_name: String,
    pub play_count: u32,
}

/// Both frequency views, read from the same point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrequencySnapshot {
    pub tracks: Vec<TrackFrequency>,
    pub artists: Vec<ArtistFrequency>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListeningStatistics {
    pub total_plays: usize,
    pub unique_tracks: usize,
    pub unique_artists: usize,
    pub first_played: Option<NaiveDate>,
    pub last_played: Option<NaiveDate>,
    pub most_played_track: Option<TrackFrequency>,
    pub most_played_artist: Option<ArtistFrequency>,
}
