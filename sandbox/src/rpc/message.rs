//! JSON-RPC 2.0 framing, one object per line.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json, json};

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
/// Script or primitive failure.
pub const SERVER_ERROR: i64 = -32000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} ({code})")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Json>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Json) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(detail: impl fmt::Display) -> Self {
        Self::new(PARSE_ERROR, format!("Parse error: {detail}"))
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, detail)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, detail)
    }

    /// Lenient read of an inbound `error` member.
    fn from_json(value: &Json) -> Self {
        if let Ok(error) = serde_json::from_value::<RpcError>(value.clone()) {
            return error;
        }
        let message = match value {
            Json::String(text) => text.clone(),
            other => other.to_string(),
        };
        Self::new(SERVER_ERROR, message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub params: Option<Json>,
    /// `None` marks a notification.
    pub id: Option<Json>,
}

impl Request {
    pub fn call(id: u64, method: impl Into<String>, params: Json) -> Self {
        Self {
            method: method.into(),
            params: Some(params),
            id: Some(Json::from(id)),
        }
    }

    pub fn notification(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: None,
            id: None,
        }
    }

    pub fn params_or_empty(&self) -> Json {
        self.params.clone().unwrap_or_else(|| Json::Object(Map::new()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// `Json::Null` when the request could not be identified.
    pub id: Json,
    pub outcome: Result<Json, RpcError>,
}

impl Response {
    pub fn success(id: Json, result: Json) -> Self {
        Self {
            id,
            outcome: Ok(result),
        }
    }

    pub fn failure(id: Json, error: RpcError) -> Self {
        Self {
            id,
            outcome: Err(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    /// Classify one inbound line.
    ///
    /// Anything carrying a `result` or `error` key is a response, even when
    /// the value is `null`. Only a non-null `error` makes it a failure.
    /// Parse failures come back as the response to send.
    pub fn parse(line: &str) -> Result<Message, Response> {
        let value: Json = serde_json::from_str(line)
            .map_err(|err| Response::failure(Json::Null, RpcError::parse_error(err)))?;
        let Json::Object(mut object) = value else {
            return Err(Response::failure(
                Json::Null,
                RpcError::invalid_request("message must be a JSON object"),
            ));
        };
        let id = object.remove("id").filter(|id| !id.is_null());

        let error = object.remove("error");
        let result = object.remove("result");
        match (error, result) {
            (Some(error), _) if !error.is_null() => {
                return Ok(Message::Response(Response::failure(
                    id.unwrap_or(Json::Null),
                    RpcError::from_json(&error),
                )));
            }
            (None, None) => {}
            // A null error is no error.
            (_, result) => {
                return Ok(Message::Response(Response::success(
                    id.unwrap_or(Json::Null),
                    result.unwrap_or(Json::Null),
                )));
            }
        }

        match object.remove("method") {
            Some(Json::String(method)) => Ok(Message::Request(Request {
                method,
                params: object.remove("params"),
                id,
            })),
            _ => Err(Response::failure(
                id.unwrap_or(Json::Null),
                RpcError::invalid_request("missing method"),
            )),
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Message::Request(request) => {
                let mut object = Map::new();
                object.insert("jsonrpc".to_string(), json!(JSONRPC_VERSION));
                object.insert("method".to_string(), json!(request.method));
                if let Some(params) = &request.params {
                    object.insert("params".to_string(), params.clone());
                }
                if let Some(id) = &request.id {
                    object.insert("id".to_string(), id.clone());
                }
                Json::Object(object)
            }
            Message::Response(response) => match &response.outcome {
                Ok(result) => json!({
                    "jsonrpc": JSONRPC_VERSION,
                    "id": response.id,
                    "result": result,
                }),
                Err(error) => json!({
                    "jsonrpc": JSONRPC_VERSION,
                    "id": response.id,
                    "error": error,
                }),
            },
        }
    }

    /// Serialized line without the trailing newline.
    pub fn to_line(&self) -> String {
        self.to_json().to_string()
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}
