//! Topic routing
//!
//! Maps configured topic templates and rooms to concrete topics, and inbound
//! topics back to the category that decides how a message is handled.

pub mod topic_router;

pub use topic_router::{TopicCategory, TopicRouter};
