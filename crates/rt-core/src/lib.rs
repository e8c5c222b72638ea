//! Real-time indicator engine for CCCP dispatch views
//!
//! The engine keeps call-center indicators (per queue, per agent session,
//! per communication and per task) up to date from the rows of a dispatch
//! server, and pushes the changes to subscribers in debounced batches.
//!
//! - [`dispatch`]: the views, the format trees sent to dispatch and the
//!   [`DispatchClient`] routing rows into the registry
//! - [`lookup`]: the [`IndicatorLut`] registry of profiles, sessions,
//!   queues and listeners
//! - [`indicators`]: indicator catalogues and the rules deriving values
//! - [`subscriber`]: subscriptions and their deliveries
//! - [`scheduler`]: the virtual clock every deferred callback runs on
//! - [`runtime`]: a tokio task hosting a client behind a command mailbox
//!
//! # Example
//!
//! ```no_run
//! use cccp_rt_core::recording::{RecordingSink, RecordingTransport};
//! use cccp_rt_core::{DispatchClient, RtConfig};
//! use tokio::time::Instant;
//!
//! let mut client = DispatchClient::new(
//!     RtConfig::default(),
//!     RecordingTransport::new(),
//!     RecordingSink::new(),
//!     Instant::now(),
//! )?;
//! client.start_views();
//! # Ok::<(), cccp_rt_core::RtError>(())
//! ```

pub mod config;
pub mod dispatch;
pub mod entities;
pub mod error;
pub mod indicators;
pub mod listeners;
pub mod localtime;
pub mod lookup;
pub mod observer;
pub mod recording;
pub mod runtime;
pub mod scheduler;
pub mod subscriber;
pub mod value;

pub use config::{RtConfig, Timings};
pub use dispatch::{DispatchClient, DispatchTransport, ListResponse, ObjectResponse, ViewKind};
pub use error::{Result, RtError};
pub use lookup::IndicatorLut;
pub use runtime::{ChannelSink, RtHandle};
pub use subscriber::{Delivery, DeliverySink, Subscriber};
