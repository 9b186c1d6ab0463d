//! Multi-strategy product price extraction.
//!
//! A check renders the product page once, then runs two independent
//! extractors over it concurrently: the network branch (captured API
//! responses, embedded structured data, then DOM scoring) and the vision
//! branch (region detection plus a recognition ensemble over a screenshot).
//! [`engine::PriceEngine`] arbitrates their results, learns which method to
//! trust per target and gates implausible price moves.

pub mod browser;
pub mod category;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod model;
pub mod output;
pub mod store;
pub mod vision;
