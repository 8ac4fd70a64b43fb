pub mod bitset;
pub mod bridge;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod flush;
pub mod format;
pub mod gc;
pub mod logger;
pub mod macros;
pub mod msg_cache;
pub mod preinit;
pub mod record;
pub mod selector;
pub mod source;
pub mod stats;
pub mod target;
pub mod time;
