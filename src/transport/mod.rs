pub mod backoff;
pub mod persistent;
pub mod selector;

pub use backoff::ReconnectPolicy;
pub use persistent::{ChannelConfig, ChannelEvent, ChannelManager, ChannelSubscription};
pub use selector::{CancelRoute, FallbackEvent, Route, TransportInput, TransportSelector};
