pub mod cli;
pub mod consolidate;
pub mod core;
pub mod crawl;
pub mod dates;
pub mod db;
pub mod dynamic_media;
pub mod extract;
pub mod fetch;
pub mod gate;
pub mod harvest;
pub mod lexicon;
pub mod readable;
pub mod search;
pub mod urlnorm;

// --- Primary exports ---
pub use self::core::types;
pub use self::core::{load_config, Config, Context};
pub use self::db::graph;
pub use self::db::models::{Domain, Expression, Land, Media, Word};
