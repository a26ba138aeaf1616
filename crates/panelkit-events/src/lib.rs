//! panelkit Events - Event bus for the template pipeline.
//!
//! This crate provides:
//! - [`PanelEvent`], the lifecycle events emitted by the orchestrator
//! - [`EventBus`], a synchronous multi-listener hub with async receivers
//!
//! # Example
//!
//! ```rust
//! use panelkit_events::{EventBus, EventMetadata, PanelEvent};
//!
//! let bus = EventBus::new();
//! let sub = bus.subscribe("cache:*", |event| {
//!     println!("{}", event.event_type());
//! });
//!
//! let delivered = bus.emit(PanelEvent::CacheCleared {
//!     metadata: EventMetadata::new("example"),
//!     entries: 0,
//! });
//! assert_eq!(delivered, 1);
//! sub.unsubscribe();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod bus;
mod event;

pub use bus::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_EMIT_DEPTH, EventBus, EventReceiver, Listener,
    Subscription, pattern_matches,
};
pub use event::{EventMetadata, PanelEvent};
