//! Additive local-to-remote synchronisation on top of `davbridge-core`,
//! plus signed expiring download tokens for sharing without credentials.

mod engine;
mod index;
mod token;

pub use engine::{SyncEngine, SyncError, SyncOptions};
pub use index::{RemoteIndex, build_index};
pub use token::TokenService;
