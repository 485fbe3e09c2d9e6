//! Redistribution between domain-decomposed and fully-assembled layouts.

pub mod cache;
pub mod kernel;
pub mod plan;

pub use cache::PlanCache;
pub use kernel::{RearrangeLayout, rearrange_for_gather, rearrange_for_scatter};
pub use plan::{Direction, PlanKey, RearrangePlan};
