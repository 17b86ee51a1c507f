pub mod chat;
pub mod data_url;
pub mod error;
pub mod events;
pub mod models;
pub mod runs;
pub mod session;

pub use error::TryOnError;
