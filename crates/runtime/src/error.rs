use roam_common::WorldUrl;

/// Errors from fetching a world descriptor.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("descriptor not found: {0}")]
    NotFound(WorldUrl),
    #[error("transport failure fetching {url}: {reason}")]
    Transport { url: WorldUrl, reason: String },
    #[error("malformed descriptor for {url}: {reason}")]
    Malformed { url: WorldUrl, reason: String },
}

/// Errors from loading a mesh or collision asset.
///
/// Always recoverable: the affected world loads without that asset and the
/// sync continues.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("failed to decode {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("IO error loading {url}: {reason}")]
    Io { url: String, reason: String },
}

/// Errors that abort a sync.
///
/// Only the root's own descriptor fetch is fatal; without it no plan can be
/// computed. Everything else degrades to a warning.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("failed to fetch root descriptor for {url}")]
    RootDiscovery {
        url: WorldUrl,
        #[source]
        source: DiscoveryError,
    },
}
