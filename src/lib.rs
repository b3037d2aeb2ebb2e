//! Fleet Exchange - command and telemetry exchange for remote vehicle ground control
//!
//! This library provides the routing and correlation core that connects
//! operator interfaces with the devices they control:
//! - A router that delivers requests to device, channel and persistence handlers
//! - Response promises that guarantee exactly one completion per request
//! - A group coordinator that forwards group commands to the elected leader
//! - A client correlation table for single-threaded UI contexts
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   UI clients                         │
//! │   ClientExchange  │  WebSocket (/ws)  │  HTTP status │
//! └────────────────────┬────────────────────────────────┘
//!                      │ requests / cancels / logs
//! ┌────────────────────▼────────────────────────────────┐
//! │                     Router                           │
//! │   registries  │  routing  │  broadcast  │  monitors  │
//! └──────┬──────────────┬──────────────┬────────────────┘
//!        │              │              │
//! ┌──────▼─────┐ ┌──────▼──────┐ ┌─────▼───────────────┐
//! │  Devices   │ │  Channels   │ │ Persistence service │
//! └──────▲─────┘ └─────────────┘ └─────────────────────┘
//!        │ group commands, via the elected leader
//! ┌──────┴──────────────────────────────────────────────┐
//! │                Group coordinator                     │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod daemon;
pub mod error;
pub mod group;
pub mod handler;
pub mod message;
pub mod promise;
pub mod router;

pub use client::{Callbacks, ClientExchange};
pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use group::{GroupCoordinator, GroupInfo};
pub use handler::{
    ChannelContext, ChannelHandler, DeviceContext, DeviceHandler, PersistenceContext,
    PersistenceService, spawn_channel, spawn_device, spawn_persistence,
};
pub use message::{
    ErrorDescription, ErrorKind, Notification, Request, RequestBody, RequestId, RequestPtr,
    Response,
};
pub use promise::{PromiseError, ResponsePromise};
pub use router::{PendingReply, Router, RouterConfig, RouterHandle, RouterStatus};
