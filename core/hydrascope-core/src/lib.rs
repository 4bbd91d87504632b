//! # hydrascope-core
//!
//! Shared logic for the hydrascope relay clients: finding where a
//! server-rendered document and its hydrated counterpart diverge, rendering
//! that divergence as a line diff, and keeping a page probe and a panel
//! talking to the relay across restarts.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Timers come from a [`Scheduler`],
//!   transports from a [`Connector`]; both are injected. [`UnixSocketConnector`]
//!   is the production transport.
//! - **Never throw across a channel**: transport failures feed the reconnect
//!   loop, skipped comparisons yield no result, storage failures are logged.
//! - **Deterministic under test**: `ManualScheduler` (feature
//!   `test-helpers`) replaces wall-clock time.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hydrascope_core::{hydration_diff, HydrationComparison};
//!
//! match hydration_diff(&server_html, &live_html, "__next") {
//!     Some(HydrationComparison::Mismatch { initial_root_html, .. }) => println!("{initial_root_html}"),
//!     Some(HydrationComparison::Equal) => println!("hydrated cleanly"),
//!     None => println!("no mount element"),
//! }
//! ```

pub mod backoff;
pub mod compare;
pub mod config;
pub mod connection;
pub mod diff;
pub mod dom;
pub mod error;
pub mod format;
pub mod panel;
pub mod probe;
pub mod scheduler;
pub mod socket;
pub mod storage;
pub mod types;

pub use compare::{compare_root, hydration_diff, HydrationComparison};
pub use config::*;
pub use connection::{Connector, ConnectionOptions, PersistentConnection, Port, PortEvents, Subscription};
pub use diff::{diff_lines, render_hydration_diff, HydrationDiff};
pub use error::{HydraError, Result};
pub use format::{HtmlFormatter, IndentFormatter};
pub use panel::{PanelSession, PanelView};
pub use probe::{HookSignal, HostSignal, PageProbe, PageSignal, ProbeOptions, StatusSink};
pub use scheduler::{Scheduler, ThreadScheduler, TimerHandle};
pub use socket::{SocketPort, UnixSocketConnector};
pub use storage::{HydrationErrorStore, JsonDirStore, KeyValueStore, MemoryStore};
pub use types::*;

#[cfg(any(test, feature = "test-helpers"))]
pub use scheduler::ManualScheduler;
