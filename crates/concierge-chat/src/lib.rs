//! Conversational core of Concierge.
//!
//! The [`DialogueRouter`] validates a message, loads the conversation,
//! classifies the intent, dispatches to the matching [`IntentHandler`] and
//! records the exchange.

pub mod cache;
pub mod error;
pub mod handler;
pub mod router;

pub use cache::QueryCache;
pub use error::{ChatError, HandlerError};
pub use handler::default::DefaultHandler;
pub use handler::faq::FaqHandler;
pub use handler::product::ProductHandler;
pub use handler::small_talk::SmallTalkHandler;
pub use handler::{HandlerRegistry, IntentHandler};
pub use router::{DialogueRouter, RouteOutcome, RouterSettings};
