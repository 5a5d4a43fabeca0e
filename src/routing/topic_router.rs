//! Exact-match topic classification for the shared dispatch callback
//!
//! All concrete topics are resolved once from the configured templates and
//! rooms. Inbound topics are classified by membership in that table; no
//! wildcard or pattern matching is involved.

use crate::protocol::{DeliveryGuarantee, Subscription, TopicError, TopicTemplate};
use std::collections::HashMap;

/// Semantic role of a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicCategory {
    Telemetry,
    Alert,
    Indicator,
    Status,
}

impl TopicCategory {
    /// Telemetry tolerates loss; everything else is delivered at least once
    pub fn delivery_guarantee(&self) -> DeliveryGuarantee {
        match self {
            TopicCategory::Telemetry => DeliveryGuarantee::AtMostOnce,
            TopicCategory::Alert | TopicCategory::Indicator | TopicCategory::Status => {
                DeliveryGuarantee::AtLeastOnce
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TopicCategory::Telemetry => "telemetry",
            TopicCategory::Alert => "alert",
            TopicCategory::Indicator => "indicator",
            TopicCategory::Status => "status",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct RouteTarget {
    category: TopicCategory,
    room_id: String,
}

/// Stateless mapping between (category, room) and concrete topics
#[derive(Debug, Clone)]
pub struct TopicRouter {
    templates: HashMap<TopicCategory, TopicTemplate>,
    rooms: Vec<String>,
    routes: HashMap<String, RouteTarget>,
}

impl TopicRouter {
    /// Resolve every (category, room) pair up front
    ///
    /// Fails when two templates resolve to the same concrete topic, since
    /// classification by exact membership would then be ambiguous.
    pub fn new(
        rooms: &[String],
        templates: &[(TopicCategory, TopicTemplate)],
    ) -> Result<Self, TopicError> {
        let mut routes = HashMap::new();
        let mut by_category = HashMap::new();

        for (category, template) in templates {
            for room_id in rooms {
                let topic = template.resolve(room_id);
                let target = RouteTarget {
                    category: *category,
                    room_id: room_id.clone(),
                };
                if let Some(existing) = routes.insert(topic.clone(), target.clone()) {
                    if existing != target {
                        return Err(TopicError::DuplicateTopic(topic));
                    }
                }
            }
            by_category.insert(*category, template.clone());
        }

        Ok(Self {
            templates: by_category,
            rooms: rooms.to_vec(),
            routes,
        })
    }

    /// Concrete topic for a room, if the category has a template
    pub fn resolve(&self, category: TopicCategory, room_id: &str) -> Option<String> {
        self.templates
            .get(&category)
            .map(|template| template.resolve(room_id))
    }

    /// Category of an inbound topic, `None` when it is not a configured topic
    pub fn classify(&self, topic: &str) -> Option<TopicCategory> {
        self.routes.get(topic).map(|target| target.category)
    }

    /// Room a configured topic was resolved for
    pub fn room_for(&self, topic: &str) -> Option<&str> {
        self.routes.get(topic).map(|target| target.room_id.as_str())
    }

    pub fn rooms(&self) -> &[String] {
        &self.rooms
    }

    pub fn has_category(&self, category: TopicCategory) -> bool {
        self.templates.contains_key(&category)
    }

    /// All concrete topics of one category, in room order
    pub fn topics(&self, category: TopicCategory) -> Vec<String> {
        match self.templates.get(&category) {
            Some(template) => self
                .rooms
                .iter()
                .map(|room_id| template.resolve(room_id))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Subscriptions for the given categories at their category guarantee
    pub fn subscriptions(&self, categories: &[TopicCategory]) -> Vec<Subscription> {
        categories
            .iter()
            .flat_map(|category| {
                let guarantee = category.delivery_guarantee();
                self.topics(*category)
                    .into_iter()
                    .map(move |topic| Subscription::new(topic, guarantee))
            })
            .collect()
    }
}
