use std::borrow::Cow;

use crate::{db::KeyValueStore, services::Services};

/// A collector which remembers the newest item it has seen (its watermark) and
/// only asks its source for items after it.
///
/// Fetching and advancing the watermark are separate steps so that callers can
/// persist the fetched items before the watermark moves past them.
#[allow(async_fn_in_trait)]
pub trait IncrementalCollector {
    type Item;
    type Watermark: Ord + serde::Serialize + serde::de::DeserializeOwned + Send + 'static;

    fn kind(&self) -> &'static str;

    fn partition(&self) -> String {
        format!("collector::{}", self.kind())
    }

    fn key(&self) -> Cow<'static, str>;

    fn watermark(&self, item: &Self::Item) -> Self::Watermark;

    async fn fetch_since(
        &self,
        watermark: Option<Self::Watermark>,
    ) -> Result<Vec<Self::Item>, human_errors::Error>;

    async fn current_watermark(
        &self,
        services: &impl Services,
    ) -> Result<Option<Self::Watermark>, human_errors::Error> {
        services.kv().get(self.partition(), self.key()).await
    }

    async fn fetch(&self, services: &impl Services) -> Result<Vec<Self::Item>, human_errors::Error> {
        let watermark = self.current_watermark(services).await?;
        self.fetch_since(watermark).await
    }

    /// Moves the stored watermark forward to the newest of `items`. It never moves backwards.
    async fn advance(
        &self,
        services: &impl Services,
        items: &[Self::Item],
    ) -> Result<(), human_errors::Error> {
        let Some(newest) = items.iter().map(|item| self.watermark(item)).max() else {
            return Ok(());
        };

        if let Some(current) = self.current_watermark(services).await? {
            if current >= newest {
                return Ok(());
            }
        }

        services.kv().set(self.partition(), self.key(), newest).await
    }
}
