use async_trait::async_trait;

/// Hooks the crawler calls around a spider run
///
/// Implementations are registered once per spider; `spider_opened` is called
/// before the first request and `spider_closed` after the last item.
#[async_trait]
pub trait SpiderExtension: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn spider_opened(&self);

    async fn spider_closed(&self, reason: &str);
}
