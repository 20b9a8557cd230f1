pub mod api;
pub mod frames;
pub mod ids;
pub mod models;

pub use ids::{MessageId, ThreadId, UserId};
