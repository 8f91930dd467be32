pub mod api;
pub mod events;
pub mod models;

pub use models::{ContentCategory, ContentType, Gender, Message, Relationship, User};
