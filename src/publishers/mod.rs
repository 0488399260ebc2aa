mod on_repeat;
pub mod spotify;

pub use on_repeat::{OnRepeatPublisher, PlaylistRemote, PublishOutcome};
pub use spotify::SpotifyClient;
