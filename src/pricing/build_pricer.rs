use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::pricing::resolver::{PriceMap, PriceResolver, Resolution};
use crate::types::{Build, Item, SlotFilter};

/// Every distinct equipped item in the filtered slots of `builds`.
pub fn items_in_builds<'a>(builds: impl IntoIterator<Item = &'a Build>, filter: &SlotFilter) -> Vec<Item> {
    builds
        .into_iter()
        .flat_map(|build| build.equipped(filter).map(|(_, item)| item.clone()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Sum of the filtered slots. Empty slots add nothing; a single equipped item
/// without a known price makes the whole build unknown, and so does a build
/// with nothing priced in it.
pub fn price_of(build: &Build, filter: &SlotFilter, prices: &PriceMap) -> Option<f64> {
    let mut total = 0.0;
    for (_, item) in build.equipped(filter) {
        total += prices.get(&item.price_key())?;
    }
    (total > 0.0).then_some(total)
}

/// Prices whole builds through the resolver.
pub struct BuildPricer {
    resolver: Arc<PriceResolver>,
}

impl BuildPricer {
    pub fn new(resolver: Arc<PriceResolver>) -> Self {
        Self { resolver }
    }

    /// Resolves every item the builds need in one pass.
    pub async fn resolve_builds<'a>(
        &self,
        builds: impl IntoIterator<Item = &'a Build>,
        filter: &SlotFilter,
    ) -> Result<Resolution> {
        let items = items_in_builds(builds, filter);
        debug!(items = items.len(), "Resolving build items");
        self.resolver.resolve(&items).await
    }
}
