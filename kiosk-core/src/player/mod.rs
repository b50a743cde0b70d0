//! Playback of cached media and the idle presentation.

mod engine;
mod format;
mod surface;

pub use engine::{DEFAULT_METRICS_INTERVAL, PlaybackEngine, PlaybackEvent};
pub use format::MediaFormat;
pub use surface::{IdleScreen, LoadedMedia, RenderSurface, SurfaceSample, booking_url};
