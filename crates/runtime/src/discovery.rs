//! Iterative descriptor discovery.
//!
//! A world's portal list is unknown until its descriptor is fetched, so the
//! reachable set can grow as discovery proceeds: each pass recomputes the
//! traversal plan and fetches descriptors for planned-to-load worlds that
//! lack one, until a full pass fetches nothing new.

use crate::backend::DescriptorSource;
use roam_common::WorldUrl;
use roam_graph::WorldGraph;
use std::collections::BTreeSet;

/// Outcome of one discovery run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    pub descriptors_fetched: usize,
    pub fetch_failures: usize,
}

/// Run discovery to fixpoint for `root` at `hop_radius`.
///
/// A failed fetch is logged once, the URL is excluded from further passes
/// of this run (so a dead world cannot stall the loop), and discovery
/// continues; a later sync retries it. The root's descriptor is expected to
/// be present already; its fetch failure is fatal and handled by the
/// caller.
pub(crate) fn run_discovery(
    graph: &mut WorldGraph,
    source: &mut dyn DescriptorSource,
    root: &WorldUrl,
    hop_radius: u32,
) -> DiscoveryOutcome {
    let mut outcome = DiscoveryOutcome::default();
    let mut failed: BTreeSet<WorldUrl> = BTreeSet::new();

    loop {
        let plan = graph.traversal_plan(root, hop_radius);
        let missing: Vec<WorldUrl> = plan
            .worlds_to_load
            .iter()
            .map(|w| w.url.clone())
            .filter(|url| !graph.has_descriptor(url) && !failed.contains(url))
            .collect();
        if missing.is_empty() {
            break;
        }

        let mut fetched_this_pass = 0;
        for url in missing {
            match source.fetch(&url) {
                Ok(descriptor) => {
                    tracing::debug!(world = %url, "descriptor discovered");
                    graph.ingest_descriptor(&url, descriptor);
                    fetched_this_pass += 1;
                }
                Err(err) => {
                    tracing::warn!(world = %url, error = %err, "descriptor fetch failed, world stays unloaded this sync");
                    failed.insert(url);
                    outcome.fetch_failures += 1;
                }
            }
        }
        outcome.descriptors_fetched += fetched_this_pass;
        if fetched_this_pass == 0 {
            break;
        }
    }
    outcome
}
