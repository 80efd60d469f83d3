//! Connection-state notifications emitted by the client.

use serde::{Serialize, Serializer};

use crate::error::Error;

/// One connection transition.
///
/// Emitted for the initial disconnected state, each failed dial (with the
/// dial error), each successful connect, each dropped socket, and the final
/// protocol-violation shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionState {
    pub connected: bool,
    #[serde(serialize_with = "error_message")]
    pub error: Option<Error>,
}

impl ConnectionState {
    pub fn connected() -> Self {
        Self {
            connected: true,
            error: None,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            connected: false,
            error: None,
        }
    }

    pub fn failed(error: Error) -> Self {
        Self {
            connected: false,
            error: Some(error),
        }
    }
}

fn error_message<S: Serializer>(error: &Option<Error>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_error_as_message() {
        let json = serde_json::to_value(ConnectionState::failed(Error::BadProtocol)).unwrap();
        assert_eq!(json["connected"], false);
        assert_eq!(json["error"], "This server does not speak IRC");

        let json = serde_json::to_value(ConnectionState::connected()).unwrap();
        assert_eq!(json["connected"], true);
        assert!(json["error"].is_null());
    }
}
