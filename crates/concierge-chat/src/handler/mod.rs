//! Intent handler trait and the dispatch table.
//!
//! Every label maps to exactly one handler; the registry is a struct with
//! one field per label so a missing handler is a compile error rather
//! than a runtime lookup failure.

pub mod default;
pub mod faq;
pub mod product;
pub mod small_talk;

use std::sync::Arc;

use async_trait::async_trait;

use concierge_core::types::{IntentLabel, RoutedRequest};

use crate::error::HandlerError;

/// Produces a reply for one intent.
#[async_trait]
pub trait IntentHandler: Send + Sync {
    fn label(&self) -> IntentLabel;

    /// Answer `request.raw_text` with `request.history` as context.
    async fn handle(&self, request: &RoutedRequest) -> Result<String, HandlerError>;
}

/// Total mapping from intent label to handler.
#[derive(Clone)]
pub struct HandlerRegistry {
    faq: Arc<dyn IntentHandler>,
    product_inquiry: Arc<dyn IntentHandler>,
    small_talk: Arc<dyn IntentHandler>,
    default: Arc<dyn IntentHandler>,
}

impl HandlerRegistry {
    pub fn new(
        faq: Arc<dyn IntentHandler>,
        product_inquiry: Arc<dyn IntentHandler>,
        small_talk: Arc<dyn IntentHandler>,
        default: Arc<dyn IntentHandler>,
    ) -> Self {
        Self {
            faq,
            product_inquiry,
            small_talk,
            default,
        }
    }

    pub fn get(&self, label: IntentLabel) -> &Arc<dyn IntentHandler> {
        match label {
            IntentLabel::Faq => &self.faq,
            IntentLabel::ProductInquiry => &self.product_inquiry,
            IntentLabel::SmallTalk => &self.small_talk,
            IntentLabel::Default => &self.default,
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(IntentLabel::ALL.iter().map(|l| self.get(*l).label()))
            .finish()
    }
}
