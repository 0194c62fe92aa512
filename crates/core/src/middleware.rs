//! Composable request-handling middleware.
//!
//! A handler maps `(context, message)` to a reply; a middleware wraps a
//! handler with another of the same shape. `chain(inner, m1, m2, ..., mN)`
//! yields `m1(m2(...mN(inner)...))`, so the first middleware sees the
//! request first and the response last.
//!
//! The production chain, outermost first: panic recovery, debug logging,
//! schema validation, authentication, metrics. The innermost handler is the
//! command dispatcher.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use crate::error::StatusError;
use crate::metrics::RpcMetrics;
use crate::proto::{Body, Message, MessageType, Request};
use crate::service::{Player, PlayerService};
use crate::session::Session;

/// Maximum accepted username length, in characters.
const MAX_USERNAME_LEN: usize = 32;

/// Immutable per-request envelope. The authenticator derives an enriched
/// copy with the player attached; nothing is stashed in thread-locals.
#[derive(Clone)]
pub struct Context {
    pub session: Arc<Session>,
    pub player: Option<Arc<Player>>,
}

impl Context {
    pub fn new(session: Arc<Session>) -> Self {
        Context { session, player: None }
    }

    pub fn with_player(mut self, player: Arc<Player>) -> Self {
        self.player = Some(player);
        self
    }
}

/// A handler either produces the response message or a status error, which
/// the connection loop folds into a `Status` response. Every request yields
/// exactly one of the two.
pub type Reply = Result<Message, StatusError>;

pub type Handler = Arc<dyn Fn(Context, Message) -> Reply + Send + Sync>;

pub type Middleware = Box<dyn Fn(Handler) -> Handler + Send + Sync>;

/// Compose middlewares around `inner`. The first element of `middlewares`
/// becomes the outermost wrapper.
pub fn chain(inner: Handler, middlewares: Vec<Middleware>) -> Handler {
    middlewares.into_iter().rev().fold(inner, |handler, middleware| middleware(handler))
}

/// Contain panics from downstream code, log the session context, and answer
/// with a canonical internal error. Must be the outermost middleware.
pub fn panic_recover() -> Middleware {
    Box::new(|next: Handler| {
        Arc::new(move |ctx: Context, msg: Message| {
            let session = Arc::clone(&ctx.session);
            match catch_unwind(AssertUnwindSafe(|| next(ctx, msg))) {
                Ok(reply) => reply,
                Err(payload) => {
                    let reason = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(session = ?session, panic = %reason, "request handler panicked");
                    Err(StatusError::internal("panic crash"))
                }
            }
        })
    })
}

/// Log request, response, and elapsed time when debug verbosity is enabled.
pub fn logger() -> Middleware {
    Box::new(|next: Handler| {
        Arc::new(move |ctx: Context, msg: Message| {
            if !tracing::enabled!(tracing::Level::DEBUG) {
                return next(ctx, msg);
            }

            let start = Instant::now();
            tracing::debug!(session_id = %ctx.session.id(), request = ?msg, "request received");

            let reply = next(ctx, msg);

            match &reply {
                Ok(resp) => {
                    tracing::debug!(response = ?resp, elapsed = ?start.elapsed(), "request handled")
                }
                Err(e) => {
                    tracing::debug!(code = e.code, error = %e, elapsed = ?start.elapsed(), "request failed")
                }
            }
            reply
        })
    })
}

/// Enforce schema constraints; failures never reach downstream handlers.
pub fn validator() -> Middleware {
    Box::new(|next: Handler| {
        Arc::new(move |ctx: Context, msg: Message| {
            validate(&msg)?;
            next(ctx, msg)
        })
    })
}

fn validate(msg: &Message) -> Result<(), StatusError> {
    let body =
        msg.body.as_ref().ok_or_else(|| StatusError::bad_request("message body is required"))?;

    let Body::Request(request) = body else {
        // responses have no constraints here; the dispatcher rejects them
        return Ok(());
    };

    if request.message_type() != msg.msg_type {
        return Err(StatusError::bad_request("type discriminator does not match body"));
    }

    match request {
        Request::Login(login) => {
            if login.username.is_empty() {
                return Err(StatusError::bad_request("username is required"));
            }
            if login.username.chars().count() > MAX_USERNAME_LEN {
                return Err(StatusError::bad_request("username too long"));
            }
            if login.password.is_empty() {
                return Err(StatusError::bad_request("password is required"));
            }
        }
        Request::GenerateRandomNickname(request) => {
            if crate::monicker::Sex::from_i32(request.sex).is_none() {
                return Err(StatusError::bad_request("sex out of range"));
            }
            if crate::monicker::Culture::from_i32(request.culture).is_none() {
                return Err(StatusError::bad_request("culture out of range"));
            }
        }
        Request::Info(_) | Request::Logout(_) => {}
    }
    Ok(())
}

/// Require a logged-in player for every request kind except INFO and LOGIN,
/// attaching the player to the context on success.
pub fn authenticator(players: Arc<PlayerService>) -> Middleware {
    Box::new(move |next: Handler| {
        let players = Arc::clone(&players);
        Arc::new(move |ctx: Context, msg: Message| {
            if matches!(msg.msg_type, MessageType::Info | MessageType::Login) {
                return next(ctx, msg);
            }

            match players.get_by_session(ctx.session.id()) {
                Some(player) => next(ctx.with_player(player), msg),
                None => Err(StatusError::bad_request("authentication required")),
            }
        })
    })
}

/// Record elapsed handling time into the per-type success/error timers and
/// the aggregate.
pub fn metrics(registry: Arc<RpcMetrics>) -> Middleware {
    Box::new(move |next: Handler| {
        let registry = Arc::clone(&registry);
        Arc::new(move |ctx: Context, msg: Message| {
            let msg_type = msg.msg_type;
            let start = Instant::now();
            let reply = next(ctx, msg);
            registry.observe(msg_type, reply.is_ok(), start.elapsed());
            reply
        })
    })
}
