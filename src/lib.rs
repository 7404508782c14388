//! In-process traffic shaping and circuit breaking.
//!
//! Calls are guarded per named resource. Every admitted call lands in a tree of
//! sliding-window statistics; flow rules read those windows to decide whether a new
//! call passes, waits or is blocked, and degrade rules trip circuit breakers when
//! completed calls turn slow or fail.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use flowguard::{Engine, EngineConfig, EntryOptions, FlowRule, clock::ManualClock};
//!
//! let engine = Engine::with_clock(EngineConfig::default(), Arc::new(ManualClock::new(1_000_000))).unwrap();
//! engine.load_flow_rules(vec![FlowRule::builder().resource("orders").threshold(1.0).build()]);
//!
//! let entry = engine.entry("orders", &EntryOptions::default()).unwrap();
//! assert!(engine.entry("orders", &EntryOptions::default()).is_err());
//! entry.exit();
//! ```

#[macro_use]
extern crate tracing;

#[macro_use]
pub mod internal_event;

pub mod clock;
pub mod concurrency;
pub mod config;
pub mod degrade;
pub mod engine;
pub mod entry;
pub mod error;
pub mod flow;
pub mod layer;
pub mod node;
pub mod stat;

pub use config::EngineConfig;
pub use degrade::{BreakerState, DegradeRule, DegradeStrategy, StateChangeObserver};
pub use engine::{CallSite, Engine};
pub use entry::{Entry, EntryOptions, EntryType};
pub use error::{BlockError, ConfigError, GuardError, RuleError};
pub use flow::{ControlBehavior, FlowRule, Grade, Strategy, TokenResult};
pub use layer::{FlowGuard, FlowGuardLayer};
