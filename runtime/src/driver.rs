//! Guided interaction driver: walks every item on a page, opening and closing
//! each one so the page issues the data request the interceptor listens for.
//!
//! The item count is read once before the walk. Each cycle then resolves the
//! i-th live element again, because opening and closing an item may rebuild
//! the list. A failed cycle is logged and recorded; the walk always runs to the
//! count it started with.

use crate::config::{Selectors, Timings};
use crate::error::Result;
use crate::session::PageSession;
use serde::Serialize;
use tracing::{error, info};

/// One item whose interaction cycle failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElementFailure {
    /// 1-based position in the walk.
    pub index: usize,
    pub error: String,
}

/// Summary of one walk over the page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalkReport {
    /// Items counted before the walk started.
    pub discovered: usize,
    /// Interaction cycles started.
    pub attempted: usize,
    pub failures: Vec<ElementFailure>,
}

impl WalkReport {
    pub fn succeeded(&self) -> usize {
        self.attempted - self.failures.len()
    }
}

/// Drives the reveal → open → wait → close sequence for each item.
pub struct GuidedDriver {
    selectors: Selectors,
    timings: Timings,
}

impl GuidedDriver {
    pub fn new(selectors: Selectors, timings: Timings) -> Self {
        Self { selectors, timings }
    }

    /// Walk every item matching the item selector.
    pub async fn walk(&self, page: &dyn PageSession) -> WalkReport {
        let count = match page.count(&self.selectors.item).await {
            Ok(n) => n,
            Err(e) => {
                error!("failed to count items: {e}");
                0
            }
        };
        info!("found {count} item cards");

        let mut report = WalkReport {
            discovered: count,
            ..Default::default()
        };

        for i in 0..count {
            report.attempted += 1;
            if let Err(e) = self.interact(page, i, count).await {
                error!("error processing item {}: {e}", i + 1);
                report.failures.push(ElementFailure {
                    index: i + 1,
                    error: e.to_string(),
                });
            }
        }

        report
    }

    async fn interact(&self, page: &dyn PageSession, i: usize, count: usize) -> Result<()> {
        let item = &self.selectors.item;

        page.scroll_into_view(item, i).await?;
        tokio::time::sleep(self.timings.settle()).await;

        page.click(item, i).await?;
        info!("clicked on item {}/{count}", i + 1);
        tokio::time::sleep(self.timings.response_wait()).await;

        page.click_first(&self.selectors.dismiss).await?;
        tokio::time::sleep(self.timings.between_items()).await;
        Ok(())
    }
}
