pub mod channel;
pub mod config;
mod context;
pub mod explorer;
pub mod runner;
pub mod tree;

pub use channel::{Channel, ChannelError, LinkState};
pub use context::AppContext;
pub use explorer::Explorer;
pub use runner::CommandRunner;
