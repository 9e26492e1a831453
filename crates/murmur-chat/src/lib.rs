//! Direct-message core: conversation resolution, message storage, the
//! delivery state machine, last-activity previews and the real-time fanout.

pub mod activity;
pub mod delivery;
pub mod fanout;
pub mod resolver;
pub mod service;
pub mod store;

pub use fanout::{Dispatcher, PublishReport, SubscriberId};
pub use service::ChatService;
pub use store::NewMessage;
