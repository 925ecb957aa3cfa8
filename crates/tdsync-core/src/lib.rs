pub mod batch;
pub mod config;
pub mod error;
pub mod gitlab;
mod http;
pub mod io;
pub mod reference;
pub mod sync;
pub mod thunderdome;
pub mod types;

pub use error::{Result, SyncError};
pub use gitlab::GitLabClient;
pub use reference::{resolve, ItemKind, ItemReference};
pub use sync::{Sessions, Tracker};
pub use thunderdome::ThunderdomeClient;
