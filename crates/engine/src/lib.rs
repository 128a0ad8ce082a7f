//! Price synchronization engine.
//!
//! Leaf-first: `pricing` and `matcher` are pure, `locator` finds rows in
//! paginated grids, `targets` owns one session per external system, and
//! `orchestrator` drives batches of SKUs through a fresh automation surface
//! each.

pub mod batch;
pub mod commerce_api;
pub mod feed;
pub mod locator;
pub mod matcher;
pub mod orchestrator;
pub mod pricing;
pub mod targets;

pub use batch::BrowserSurfaceFactory;
pub use feed::ProductFeed;
pub use orchestrator::{BatchSurface, Orchestrator, Summary, SurfaceFactory};
