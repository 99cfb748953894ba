pub mod engine;
pub mod playlist;
pub mod video;

pub use engine::Deck;
pub use playlist::Playlist;
