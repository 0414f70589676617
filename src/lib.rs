pub mod config;
pub mod coordinator;
pub mod emotion;
pub mod error;
pub mod keyboard;
pub mod lexicon;
pub mod llm;
pub mod model;
pub mod pause;
pub mod playback;
pub mod segmenter;
pub mod session;
pub mod sim;
pub mod sticker;
pub mod timeline;
pub mod trace;
pub mod typo;

pub use coordinator::{generate_timeline, BehaviorCoordinator};
pub use model::{ActionKind, PlaybackAction, Timeline};
