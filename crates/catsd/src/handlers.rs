//! Example handlers wired up by the binary, demonstrating the engine end to
//! end: a byte echo, a JSON form with validation, and an interactive
//! back-and-forth that drives [`ConnectionHandle::ask`].

use async_trait::async_trait;
use cats_codec::codec::{EncodeInput, Payload};
use cats_codec::files::FileSource;
use cats_core::wire::CODEC_FILES;
use cats_core::Headers;

use crate::connection::ConnectionHandle;
use crate::dispatch::{DispatchError, Handler, HandlerGuards, HandlerOutcome};
use crate::identity::Identity;

pub const ECHO_HANDLER_ID: u16 = 0x0001;
pub const FORM_HANDLER_ID: u16 = 0x0002;
pub const INTERACTIVE_HANDLER_ID: u16 = 0x0003;
pub const SIGN_IN_HANDLER_ID: u16 = 0x0004;
pub const THROTTLE_HANDLER_ID: u16 = 0x0005;
pub const FILES_ECHO_HANDLER_ID: u16 = 0x0006;

/// Returns the payload unchanged; `Offset`/`Skip` truncation happens on the
/// sending side before the bytes ever reach the wire, so the handler never
/// has to special-case it.
pub struct EchoHandler {
    guards: HandlerGuards,
}

impl Default for EchoHandler {
    fn default() -> Self {
        Self { guards: HandlerGuards { allowed_data_types: Some(vec![0]), ..Default::default() } }
    }
}

#[async_trait]
impl Handler for EchoHandler {
    fn guards(&self) -> &HandlerGuards {
        &self.guards
    }

    async fn handle(
        &self,
        _conn: &ConnectionHandle,
        _headers: Headers,
        payload: Payload,
    ) -> Result<Option<HandlerOutcome>, DispatchError> {
        let bytes = match payload {
            Payload::Bytes(b) => b,
            _ => return Err(DispatchError::GuardFailed("echo expects bytes".to_string())),
        };
        Ok(Some(HandlerOutcome::bytes(bytes)))
    }
}

/// Validates a small JSON form: `id` in `0..=10`, `name` length in `3..=16`.
/// On success returns a fresh token/code pair; on a non-object payload
/// fails the guard, which `DefaultErrorHandler` turns into a 400 response.
#[derive(Default)]
pub struct FormHandler {
    guards: HandlerGuards,
}

#[async_trait]
impl Handler for FormHandler {
    fn guards(&self) -> &HandlerGuards {
        &self.guards
    }

    async fn handle(
        &self,
        _conn: &ConnectionHandle,
        _headers: Headers,
        payload: Payload,
    ) -> Result<Option<HandlerOutcome>, DispatchError> {
        let doc = match payload {
            Payload::Document(v) => v,
            _ => return Err(DispatchError::GuardFailed("form expects a document".to_string())),
        };
        let obj = doc.as_object().ok_or_else(|| DispatchError::GuardFailed("payload is not an object".to_string()))?;

        let id = obj.get("id").and_then(|v| v.as_i64()).ok_or_else(|| DispatchError::GuardFailed("missing id".to_string()))?;
        if !(0..=10).contains(&id) {
            return Err(DispatchError::GuardFailed("id out of range".to_string()));
        }
        let name =
            obj.get("name").and_then(|v| v.as_str()).ok_or_else(|| DispatchError::GuardFailed("missing name".to_string()))?;
        if !(3..=16).contains(&name.len()) {
            return Err(DispatchError::GuardFailed("name length out of range".to_string()));
        }

        let token: String = (0..64).map(|_| char::from_digit(rand::random::<u32>() % 16, 16).unwrap()).collect();
        let code: String = (0..6).map(|_| char::from_digit(rand::random::<u32>() % 16, 16).unwrap()).collect();

        Ok(Some(HandlerOutcome::json(serde_json::json!({ "token": token, "code": code }))))
    }
}

/// Asks the client a yes/no question and maps the reply to a response;
/// a cancelled input surfaces as a 500.
#[derive(Default)]
pub struct InteractiveHandler {
    guards: HandlerGuards,
}

#[async_trait]
impl Handler for InteractiveHandler {
    fn guards(&self) -> &HandlerGuards {
        &self.guards
    }

    async fn handle(
        &self,
        conn: &ConnectionHandle,
        _headers: Headers,
        _payload: Payload,
    ) -> Result<Option<HandlerOutcome>, DispatchError> {
        let message_id = conn.next_client_message_id();
        let question = EncodeInput::Bytes(b"Are you ok?".to_vec());
        let reply = conn.ask(message_id, &question, Headers::new(), None, false, false).await;

        match reply {
            Ok((_, body)) if body == b"yes" => Ok(Some(HandlerOutcome::bytes(b"Nice!".to_vec()))),
            Ok((_, body)) if body == b"no" => Ok(Some(HandlerOutcome::bytes(b"Sad!".to_vec()))),
            Ok(_) => Ok(Some(HandlerOutcome::bytes(b"Huh?".to_vec()).with_status(400))),
            Err(_) => Ok(Some(HandlerOutcome::bytes(b"input cancelled".to_vec()).with_status(500))),
        }
    }
}

/// Signs the connection in as `{model_name, id}` (or signs it out if the
/// payload is empty), auto-attaching it to that identity's channels. A thin
/// demo wrapper over [`ConnectionHandle::sign_in`]/`sign_out`, here so
/// broadcast-to-a-channel can be exercised end to end.
#[derive(Default)]
pub struct SignInHandler {
    guards: HandlerGuards,
}

#[async_trait]
impl Handler for SignInHandler {
    fn guards(&self) -> &HandlerGuards {
        &self.guards
    }

    async fn handle(
        &self,
        conn: &ConnectionHandle,
        _headers: Headers,
        payload: Payload,
    ) -> Result<Option<HandlerOutcome>, DispatchError> {
        let doc = match payload {
            Payload::Document(v) => v,
            _ => return Err(DispatchError::GuardFailed("sign-in expects a document".to_string())),
        };

        if doc.as_object().map(|o| o.is_empty()).unwrap_or(true) {
            conn.sign_out();
            return Ok(Some(HandlerOutcome::bytes(b"signed out".to_vec())));
        }

        let model_name = doc
            .get("model_name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DispatchError::GuardFailed("missing model_name".to_string()))?;
        let id = doc.get("id").and_then(|v| v.as_str()).ok_or_else(|| DispatchError::GuardFailed("missing id".to_string()))?;

        conn.sign_in(Identity::new(model_name, id, None));
        Ok(Some(HandlerOutcome::bytes(b"signed in".to_vec())))
    }
}

/// Re-paces the connection's outbound stream toward this client, reading
/// the requested bytes/sec from a raw big-endian `u32` payload. Demonstrates
/// that download-speed negotiation isn't only client-to-server: a server
/// handler can ask the client to re-pace its own stream in the other
/// direction too.
#[derive(Default)]
pub struct ThrottleHandler {
    guards: HandlerGuards,
}

#[async_trait]
impl Handler for ThrottleHandler {
    fn guards(&self) -> &HandlerGuards {
        &self.guards
    }

    async fn handle(
        &self,
        conn: &ConnectionHandle,
        _headers: Headers,
        payload: Payload,
    ) -> Result<Option<HandlerOutcome>, DispatchError> {
        let bytes = match payload {
            Payload::Bytes(b) if b.len() == 4 => b,
            _ => return Err(DispatchError::GuardFailed("expected a 4-byte big-endian speed".to_string())),
        };
        let speed = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let _ = conn.send_download_speed(speed).await;
        Ok(Some(HandlerOutcome::bytes(b"ok".to_vec())))
    }
}

/// Re-sends every file it received back to the client unchanged, reading
/// each entry's contents straight from the codec's own temp file. Exists to
/// drive the files codec (decode and re-encode) over a real connection,
/// rather than only at the codec's own unit-test level.
pub struct FilesEchoHandler {
    guards: HandlerGuards,
}

impl Default for FilesEchoHandler {
    fn default() -> Self {
        Self { guards: HandlerGuards { allowed_data_types: Some(vec![CODEC_FILES]), ..Default::default() } }
    }
}

#[async_trait]
impl Handler for FilesEchoHandler {
    fn guards(&self) -> &HandlerGuards {
        &self.guards
    }

    async fn handle(
        &self,
        _conn: &ConnectionHandle,
        _headers: Headers,
        payload: Payload,
    ) -> Result<Option<HandlerOutcome>, DispatchError> {
        let files = match payload {
            Payload::Files(f) => f,
            _ => return Err(DispatchError::GuardFailed("expected a files payload".to_string())),
        };

        let sources: Vec<FileSource> = files
            .keys()
            .map(|key| {
                let entry = files.get(key).expect("key came from files.keys()");
                FileSource::Path {
                    key: key.clone(),
                    name: entry.name.clone(),
                    mime: entry.mime.clone(),
                    path: entry.path().to_path_buf(),
                }
            })
            .collect();

        Ok(Some(HandlerOutcome { headers: Headers::new(), payload: EncodeInput::Files(sources) }))
    }
}
