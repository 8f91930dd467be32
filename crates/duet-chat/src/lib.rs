//! Chat for one relationship: paged history, live merge of change events,
//! attachments, per-action status and the 24-hour retention sweep.

pub mod actions;
pub mod attachments;
pub mod cache;
pub mod error;
pub mod gifs;
pub mod pagination;
pub mod retention;
pub mod session;

pub use actions::{ActionKind, ActionState, ActionTracker};
pub use attachments::MediaAsset;
pub use cache::{ChatEvent, MessageCache};
pub use error::ChatError;
pub use gifs::{GifClient, GifConfig};
pub use pagination::{Debouncer, PageRequest, PaginationController};
pub use retention::SweepReport;
pub use session::{ChatIdentity, ChatSession};
