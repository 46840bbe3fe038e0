//! Routing: the radix path index and the request matcher layered on it.
pub mod matcher;
pub mod radix;

pub use matcher::{MatchError, MatchResult, RouteMatcher};
pub use radix::{PathParams, RadixTree};
