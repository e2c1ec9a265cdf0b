pub mod cache;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod request;
pub mod sequence;
pub mod validation;
pub mod wal;
