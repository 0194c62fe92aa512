//! Wire message schema: a tagged union of requests and responses.
//!
//! Every message carries an explicit `type` discriminator equal to its inner
//! kind, so a client can correlate responses (including error `Status`
//! responses) with the request that produced them.
//!
//! ```text
//! Message { type, body }
//!   body: Request  — InfoRequest | LoginRequest | LogoutRequest
//!                    | GenerateRandomNicknameRequest
//!   body: Response — Status | InfoResponse | LoginResponse | LogoutResponse
//!                    | GenerateRandomNicknameResponse
//! ```
//!
//! Bodies are serialized as MessagePack maps (field names on the wire), which
//! keeps field order deterministic and lets the decoder skip unknown fields
//! for forward compatibility.

pub mod codec;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, STATUS_OK, StatusCode, StatusError};

/// Message kind discriminator, present on every wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    #[default]
    Info,
    Login,
    Logout,
    GenerateRandomNickname,
}

impl MessageType {
    /// Wire/metric name of this kind.
    pub fn name(&self) -> &'static str {
        match self {
            MessageType::Info => "INFO",
            MessageType::Login => "LOGIN",
            MessageType::Logout => "LOGOUT",
            MessageType::GenerateRandomNickname => "GENERATE_RANDOM_NICKNAME",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InfoRequest {}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogoutRequest {}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GenerateRandomNicknameRequest {
    pub sex: i32,
    pub culture: i32,
}

/// Error/acknowledgement response variant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InfoResponse {
    pub server_name: String,
    pub max_player_capacity: i32,
    pub max_connection_capacity: i32,
    pub metrics: BTreeMap<String, String>,
    pub online_players: i32,
    pub tcp_connections: i32,
    pub udp_connections: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoginResponse {}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogoutResponse {}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GenerateRandomNicknameResponse {
    pub nickname: String,
}

/// Union of request kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Info(InfoRequest),
    Login(LoginRequest),
    Logout(LogoutRequest),
    GenerateRandomNickname(GenerateRandomNicknameRequest),
}

impl Request {
    /// The discriminator this request kind must travel under.
    pub fn message_type(&self) -> MessageType {
        match self {
            Request::Info(_) => MessageType::Info,
            Request::Login(_) => MessageType::Login,
            Request::Logout(_) => MessageType::Logout,
            Request::GenerateRandomNickname(_) => MessageType::GenerateRandomNickname,
        }
    }
}

/// Union of response kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Status(Status),
    Info(InfoResponse),
    Login(LoginResponse),
    Logout(LogoutResponse),
    GenerateRandomNickname(GenerateRandomNicknameResponse),
}

/// Direction of a message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Body {
    Request(Request),
    Response(Response),
}

/// A complete wire message.
///
/// The default value (INFO discriminator, no body) is what a zero-length
/// frame decodes to; the validator rejects it before it reaches a command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type", default)]
    pub msg_type: MessageType,
    #[serde(default)]
    pub body: Option<Body>,
}

impl Message {
    /// Wrap a request, inferring the discriminator from the variant.
    pub fn request(req: Request) -> Self {
        Message { msg_type: req.message_type(), body: Some(Body::Request(req)) }
    }

    /// Wrap a response under the discriminator of the request it answers.
    pub fn response(msg_type: MessageType, resp: Response) -> Self {
        Message { msg_type, body: Some(Body::Response(resp)) }
    }

    /// A `Status` response with the given code and text.
    pub fn status(msg_type: MessageType, code: StatusCode, message: impl Into<String>) -> Self {
        Self::response(msg_type, Response::Status(Status { code, message: message.into() }))
    }

    /// The canonical success acknowledgement: `Status{0, "OK"}`.
    pub fn ok_status(msg_type: MessageType) -> Self {
        Self::status(msg_type, STATUS_OK, "OK")
    }

    /// Fold a handler error into a wire response, preserving the request
    /// discriminator.
    pub fn from_status_error(msg_type: MessageType, err: &StatusError) -> Self {
        Self::status(msg_type, err.code, err.message.clone())
    }

    pub fn as_request(&self) -> Option<&Request> {
        match &self.body {
            Some(Body::Request(req)) => Some(req),
            _ => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match &self.body {
            Some(Body::Response(resp)) => Some(resp),
            _ => None,
        }
    }

    /// The status payload, if this message carries one.
    pub fn as_status(&self) -> Option<&Status> {
        match self.as_response() {
            Some(Response::Status(status)) => Some(status),
            _ => None,
        }
    }
}

/// Serialize a message body with deterministic field order (struct-map mode).
pub(crate) fn encode_body(msg: &Message) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut serializer = rmp_serde::Serializer::new(&mut buf).with_struct_map();
    msg.serialize(&mut serializer)?;
    Ok(buf)
}

/// Parse a message body. Unknown map keys are skipped, so newer peers can
/// add fields without breaking older ones.
pub(crate) fn decode_body(data: &[u8]) -> Result<Message> {
    Ok(rmp_serde::from_slice(data)?)
}
