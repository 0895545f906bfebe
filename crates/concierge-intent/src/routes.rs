//! Labeled reference utterances for the fast tier.

use concierge_core::types::IntentLabel;

/// Reference utterances for one intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub label: IntentLabel,
    pub utterances: Vec<String>,
}

impl Route {
    pub fn new<I, S>(label: IntentLabel, utterances: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            label,
            utterances: utterances.into_iter().map(Into::into).collect(),
        }
    }
}

/// The full set of routes the fast tier scores against.
///
/// `default` never has a route: it is only reached through the fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSet {
    routes: Vec<Route>,
}

const FAQ_UTTERANCES: &[&str] = &[
    "What is the return policy of the products?",
    "How can I track my order?",
    "What payment methods are accepted?",
    "How do I contact customer support?",
    "Can I change or cancel my order?",
    "Are there any ongoing sales or promotions?",
    "What is the warranty on your products?",
    "How do I create an account?",
    "What are the shipping options available?",
    "How do I reset my password?",
    "How can I return a product I bought?",
];

const SMALL_TALK_UTTERANCES: &[&str] = &[
    "Hello",
    "Hi there",
    "How are you?",
    "What's up?",
    "Tell me a joke",
    "Goodbye",
    "See you later",
    "Thanks",
    "Thank you",
    "You're welcome",
    "What is your name?",
    "Are you a robot?",
    "What are you?",
    "What do you do?",
];

// Referential follow-ups ("which of those ...") are left to the
// contextual tier, which can see what "those" refers to.
const PRODUCT_UTTERANCES: &[&str] = &[
    "How much are Nike shoes?",
    "Show me the price of mobile phones.",
    "Are there any discounts on shirts today?",
    "Find cheap running shoes.",
    "What is the price of Samsung mobile phones?",
    "Which mobile phones have the best rating?",
    "Show me top rated shirts.",
    "Find shoes with 5 star ratings.",
    "Are Adidas shirts popular?",
    "Recommend mobile phones with good reviews.",
    "Are Puma shoes in stock?",
    "Check if you have any mobile phones available.",
    "Do you have shirts in stock?",
    "I want to buy a mobile phone.",
    "Show me shirts from Nike.",
    "Do you sell shoes for running?",
    "List all available mobile phones.",
    "Send me a link to buy shoes.",
    "Where can I order shirts?",
];

impl RouteSet {
    /// Build a set from explicit routes. Routes labeled `default` are
    /// dropped.
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            routes: routes
                .into_iter()
                .filter(|r| r.label != IntentLabel::Default)
                .collect(),
        }
    }

    /// The shop assistant's built-in routes.
    pub fn default_routes() -> Self {
        Self::new(vec![
            Route::new(IntentLabel::Faq, FAQ_UTTERANCES.iter().copied()),
            Route::new(IntentLabel::ProductInquiry, PRODUCT_UTTERANCES.iter().copied()),
            Route::new(IntentLabel::SmallTalk, SMALL_TALK_UTTERANCES.iter().copied()),
        ])
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn labels(&self) -> impl Iterator<Item = IntentLabel> + '_ {
        self.routes.iter().map(|r| r.label)
    }

    pub fn utterance_count(&self) -> usize {
        self.routes.iter().map(|r| r.utterances.len()).sum()
    }
}

impl Default for RouteSet {
    fn default() -> Self {
        Self::default_routes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_routes_cover_non_default_labels() {
        let routes = RouteSet::default_routes();
        let labels: Vec<IntentLabel> = routes.labels().collect();
        assert_eq!(
            labels,
            vec![
                IntentLabel::Faq,
                IntentLabel::ProductInquiry,
                IntentLabel::SmallTalk
            ]
        );
        assert_eq!(routes.utterance_count(), 11 + 19 + 14);
    }

    #[test]
    fn test_referential_utterance_excluded() {
        let routes = RouteSet::default_routes();
        assert!(routes
            .routes()
            .iter()
            .flat_map(|r| r.utterances.iter())
            .all(|u| !u.to_lowercase().contains("those")));
    }

    #[test]
    fn test_default_label_is_dropped() {
        let routes = RouteSet::new(vec![
            Route::new(IntentLabel::Default, ["anything"]),
            Route::new(IntentLabel::Faq, ["How do I reset my password?"]),
        ]);
        assert_eq!(routes.routes().len(), 1);
        assert_eq!(routes.routes()[0].label, IntentLabel::Faq);
    }
}
