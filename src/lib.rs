//! netclock: a network clock for devices whose own clock cannot be trusted
//!
//! The clock queries a set of NTP servers over UDP, keeps a short history of
//! samples per server, decides which servers are trustworthy, and combines
//! the trusted ones into a single offset from the device clock. Readers get
//! "network time" as device time plus that offset, from any thread, without
//! waiting on the network.
//!
//! ```no_run
//! use netclock::{ClockConfig, NetworkClock};
//!
//! #[tokio::main]
//! async fn main() -> netclock::Result<()> {
//!     let mut clock = NetworkClock::new(ClockConfig::default());
//!     clock.start().await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!     println!("offset {:+.6}s trusted={}", clock.current_offset(), clock.is_trusted());
//!     clock.stop().await
//! }
//! ```

pub mod core;
pub mod network;
pub mod protocol;
pub mod sync;
pub mod time;

// Re-export commonly used items
pub use crate::core::{ClockConfig, Error, Poll, Result, ServerId};
pub use crate::sync::{AssociationEvent, AssociationReport, NetworkClock, PublishedOffset};
pub use crate::time::Timestamp;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
