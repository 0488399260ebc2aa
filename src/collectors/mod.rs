mod incremental;
mod recently_played;

pub use incremental::IncrementalCollector;
pub use recently_played::{IngestReport, ListeningHistory, PlayedItem, RecentlyPlayedCollector};
