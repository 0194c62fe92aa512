//! # cgs — dual-transport game protocol server
//!
//! A long-lived server that accepts concurrent client connections over two
//! transports, exchanges length-prefixed binary messages carrying a tagged
//! request/response schema, authenticates clients into logical players,
//! executes a small command set, and publishes operational telemetry.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  Application   — wiring, graceful shutdown    │
//! ├───────────────────────────────────────────────┤
//! │  Server        — acceptor, connection loop    │
//! │  Middleware    — panic/log/validate/auth/     │
//! │                  metrics around the dispatcher│
//! │  Command       — INFO, LOGIN, LOGOUT, ...     │
//! ├───────────────────────────────────────────────┤
//! │  Session       — registry, idle sweeper       │
//! │  Service       — players, status projections  │
//! │  Events        — session-terminated fan-out   │
//! ├───────────────────────────────────────────────┤
//! │  Proto         — schema, framed codec         │
//! │  Transport     — TCP, reliable datagram       │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Data path: bytes ⇄ codec ⇄ message ⇄ middleware chain ⇄ dispatcher ⇄
//! command, and back out the same way. Control path: the acceptor spawns one
//! thread per connection; each thread owns one session; the sweeper evicts
//! idle sessions and the event bus carries the eviction back into the player
//! registry.
//!
//! ## Quick start
//!
//! ```no_run
//! use cgs::app::Application;
//! use cgs::config::Config;
//!
//! let app = Application::new(Config::default()).unwrap();
//! app.run().unwrap(); // serves until SIGTERM/SIGINT
//! ```
//!
//! ## Crate layout
//!
//! - [`app`] — [`Application`](app::Application) wiring and shutdown.
//! - [`server`] — acceptor and per-connection message loop.
//! - [`middleware`] — handler chain and the five cross-cutting middlewares.
//! - [`command`] — the command dispatcher.
//! - [`session`] — [`Session`](session::Session),
//!   [`SessionManager`](session::SessionManager), idle sweeper.
//! - [`service`] — player registry and auxiliary status projections.
//! - [`events`] — in-process pub/sub for session termination.
//! - [`metrics`] — RPC rate/latency timer registry.
//! - [`proto`] — message schema and the length-prefixed codec.
//! - [`transport`] — TCP and reliable-datagram listeners behind one trait.
//! - [`rest`] — read-only HTTP `/status` and `/metrics`.
//! - [`config`], [`logging`], [`monicker`], [`error`] — supporting pieces.

pub mod app;
pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod monicker;
pub mod proto;
pub mod rest;
pub mod server;
pub mod service;
pub mod session;
pub mod transport;

pub use app::Application;
pub use config::Config;
pub use error::{Error, Result, StatusError};
pub use proto::codec::Codec;
pub use server::Server;
pub use session::{Session, SessionManager};
