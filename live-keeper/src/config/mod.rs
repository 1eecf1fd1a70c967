//! Configuration: runtime settings and the reloadable source list.

pub mod loader;
pub mod model;
pub mod watcher;

pub use loader::{ChannelEntry, RejectedSource, SourceList, build_sources, load_channel_list};
pub use model::{
    CaptureSettings, CollisionPolicy, FinalizerSettings, PollSettings, RenderSettings, Settings,
};
pub use watcher::ConfigWatcher;
