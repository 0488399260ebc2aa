pub use crate::config::Config;
pub use crate::db::{KeyValueStore, PlayEventStore};
pub use crate::oauth::OAuth2RefreshToken;
pub use crate::services::Services;

pub use human_errors::ResultExt;
pub use serde::{Deserialize, Serialize, de::DeserializeOwned};
pub use tracing::{Instrument, debug, error, info, info_span, instrument, warn};
