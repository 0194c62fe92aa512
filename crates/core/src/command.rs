//! Command dispatch: select and run a server-side action from the request
//! variant.

use std::sync::Arc;

use crate::config::Config;
use crate::error::StatusError;
use crate::middleware::{Context, Handler, Reply};
use crate::proto::{
    Body, GenerateRandomNicknameResponse, InfoResponse, Message, Request, Response,
};
use crate::service::ServiceFactory;

/// Dispatches validated requests to commands. Sits at the innermost end of
/// the middleware chain.
pub struct Executor {
    config: Arc<Config>,
    services: Arc<ServiceFactory>,
}

impl Executor {
    pub fn new(config: Arc<Config>, services: Arc<ServiceFactory>) -> Arc<Self> {
        Arc::new(Executor { config, services })
    }

    /// Adapt the executor into the chain's handler shape.
    pub fn handler(self: &Arc<Self>) -> Handler {
        let executor = Arc::clone(self);
        Arc::new(move |ctx, msg| executor.execute(ctx, msg))
    }

    fn execute(&self, ctx: Context, msg: Message) -> Reply {
        let msg_type = msg.msg_type;
        let Some(Body::Request(request)) = msg.body else {
            return Err(StatusError::bad_request("message type not supported"));
        };

        // Commands returning no payload collapse into the canonical OK status.
        let response = match request {
            Request::Info(_) => Some(self.info()),
            Request::Login(request) => {
                self.services.player.login(&request, &ctx.session)?;
                None
            }
            Request::Logout(_) => {
                let player = ctx
                    .player
                    .as_ref()
                    .ok_or_else(|| StatusError::bad_request("authentication required"))?;
                self.services.player.kickoff(player);
                None
            }
            Request::GenerateRandomNickname(request) => {
                let nickname =
                    self.services.auxiliary.generate_nickname(request.sex, request.culture);
                Some(Response::GenerateRandomNickname(GenerateRandomNicknameResponse {
                    nickname,
                }))
            }
        };

        Ok(match response {
            Some(response) => Message::response(msg_type, response),
            None => Message::ok_status(msg_type),
        })
    }

    fn info(&self) -> Response {
        let status = self.services.auxiliary.collect_server_status();
        let (tcp_connections, udp_connections) = self.services.auxiliary.transport_connections();

        Response::Info(InfoResponse {
            server_name: status.server_name,
            max_player_capacity: self.config.server.max_player_capacity as i32,
            max_connection_capacity: self.config.server.max_connection_capacity as i32,
            metrics: self.services.auxiliary.gather_overall_rpc_rate_metrics(),
            online_players: status.online_players as i32,
            tcp_connections: tcp_connections as i32,
            udp_connections: udp_connections as i32,
        })
    }
}
