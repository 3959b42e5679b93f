mod event;
mod message;
mod session;

pub use event::{StreamEvent, ToolStatus};
pub use message::{Message, Role, PLACEHOLDER_TEXT};
pub use session::{ConnectionState, Session};
