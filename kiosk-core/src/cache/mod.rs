//! Local asset cache and the prefetch step that fills it.

mod asset;
mod media;
mod prefetch;

pub use asset::{AssetCache, CachedAsset, asset_id};
pub use media::{HubMediaStore, MediaStore};
pub use prefetch::{PrefetchConfig, Prefetcher};
