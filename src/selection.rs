//! Frequency-stratified playlist selection.
//!
//! Candidate tracks are grouped into tiers by play count. Every tier above the
//! lowest is included in full, in descending count order, and whatever room is
//! left is filled from the lowest tier. Within the lowest tier tracks by rarely
//! played artists are preferred, with ties shuffled by the supplied random source.

use std::collections::{BTreeMap, HashMap, HashSet};

use rand::{Rng, seq::SliceRandom};

use crate::db::{ArtistFrequency, TrackFrequency};

/// How many more candidate tracks than playlist slots are read from the store.
pub const OVER_FETCH_FACTOR: usize = 2;

pub fn candidate_limit(size: usize) -> usize {
    size.saturating_mul(OVER_FETCH_FACTOR)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub track_ids: Vec<String>,
    pub requested: usize,
}

impl Selection {
    pub fn len(&self) -> usize {
        self.track_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.track_ids.is_empty()
    }

    /// The number of requested slots that could not be filled.
    pub fn shortfall(&self) -> usize {
        self.requested.saturating_sub(self.track_ids.len())
    }
}

/// Candidate tracks keyed by their play count.
struct FrequencyTiers<'a> {
    tiers: BTreeMap<u32, Vec<&'a TrackFrequency>>,
}

impl<'a> FrequencyTiers<'a> {
    fn new(candidates: &[&'a TrackFrequency]) -> Self {
        let mut tiers: BTreeMap<u32, Vec<&'a TrackFrequency>> = BTreeMap::new();
        for &track in candidates {
            tiers.entry(track.play_count).or_default().push(track);
        }

        Self { tiers }
    }

    fn lowest(&self) -> Option<u32> {
        self.tiers.keys().next().copied()
    }

    /// Tiers above the lowest, highest count first.
    fn head(&self) -> impl Iterator<Item = &Vec<&'a TrackFrequency>> {
        self.tiers.values().skip(1).rev()
    }

    fn tier(&self, count: u32) -> &[&'a TrackFrequency] {
        self.tiers.get(&count).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Picks up to `size` distinct track ids from `candidates`, which are expected in
/// the order produced by the track frequency view (play count descending, then name).
pub fn select_tracks<R: Rng + ?Sized>(
    size: usize,
    candidates: &[TrackFrequency],
    artists: &[ArtistFrequency],
    rng: &mut R,
) -> Selection {
    let mut seen = HashSet::new();
    let candidates: Vec<&TrackFrequency> = candidates
        .iter()
        .filter(|track| seen.insert(track.track_id.as_str()))
        .collect();

    if candidates.len() <= size {
        return Selection {
            track_ids: candidates.iter().map(|t| t.track_id.clone()).collect(),
            requested: size,
        };
    }

    let artist_counts: HashMap<&str, u32> = artists
        .iter()
        .map(|a| (a.artist_name.as_str(), a.play_count))
        .collect();

    let tiers = FrequencyTiers::new(&candidates);
    let mut track_ids: Vec<String> = Vec::with_capacity(size);

    for tier in tiers.head() {
        let remaining = size - track_ids.len();
        if remaining == 0 {
            break;
        }

        if tier.len() <= remaining {
            track_ids.extend(tier.iter().map(|t| t.track_id.clone()));
        } else {
            track_ids.extend(tie_break(tier, remaining, &artist_counts, rng));
        }
    }

    let remaining = size - track_ids.len();
    if remaining > 0 {
        if let Some(lowest) = tiers.lowest() {
            track_ids.extend(tie_break(tiers.tier(lowest), remaining, &artist_counts, rng));
        }
    }

    Selection {
        track_ids,
        requested: size,
    }
}

/// Takes `remaining` tracks from `tier`, preferring tracks whose artist has the
/// fewest plays. Tracks whose artists share a play count are shuffled.
fn tie_break<R: Rng + ?Sized>(
    tier: &[&TrackFrequency],
    remaining: usize,
    artist_counts: &HashMap<&str, u32>,
    rng: &mut R,
) -> Vec<String> {
    let mut by_artist_count: BTreeMap<u32, Vec<&TrackFrequency>> = BTreeMap::new();
    for &track in tier {
        let count = artist_counts
            .get(track.artist_name.as_str())
            .copied()
            .unwrap_or(0);
        by_artist_count.entry(count).or_default().push(track);
    }

    let mut picked = Vec::with_capacity(remaining);
    for group in by_artist_count.values_mut() {
        group.shuffle(&mut *rng);

        for track in group.iter().take(remaining - picked.len()) {
            picked.push(track.track_id.clone());
        }

        if picked.len() == remaining {
            break;
        }
    }

    picked
}
