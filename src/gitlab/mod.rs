//! GitLab API access, the local pipeline cache, and trace analysis.

pub mod cache;
pub mod client;
pub mod explorer;
pub mod failures;
pub mod summary;
pub mod types;

pub use explorer::Explorer;
