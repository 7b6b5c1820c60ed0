//! Chat method handlers.
//!
//! The contract with clients:
//!
//! | method         | params                      | result                          |
//! |----------------|-----------------------------|---------------------------------|
//! | `login`        | `{name}`                    | `{uid, name, status}`           |
//! | `client_list`  | `{}`                        | `{clients: [{uid, name}]}`      |
//! | `send_public`  | `{text}`                    | `{delivered: true}`             |
//! | `send_private` | `{to_uid, text}`            | `{delivered: true}`             |
//! | `ping`         | `{}`                        | `{msg: "pong"}`                 |
//!
//! `login` broadcasts `user_joined`, `send_public` broadcasts
//! `public_message`, and `send_private` pushes `private_message` to the
//! one recipient.  `user_left` is broadcast by the session layer itself.

use parley_net::{HandlerError, Router, SessionManager};
use parley_protocol::Message;
use serde_json::{Value, json};
use std::sync::Arc;

pub fn register(router: &Router, sessions: &Arc<SessionManager>) {
    let registry = Arc::clone(sessions);
    router.add("login", move |params, uid| {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("guest")
            .to_owned();
        registry.set_name(uid, &name);
        registry.broadcast(&Message::push(json!({
            "event": "user_joined",
            "uid": uid,
            "name": name,
        })));
        Ok(json!({"uid": uid, "name": name, "status": "success"}))
    });

    let registry = Arc::clone(sessions);
    router.add("client_list", move |_params, _uid| {
        let clients: Vec<Value> = registry
            .list_ids()
            .into_iter()
            .map(|id| json!({"uid": id, "name": registry.get_name(id)}))
            .collect();
        Ok(json!({"clients": clients}))
    });

    let registry = Arc::clone(sessions);
    router.add("send_public", move |params, uid| {
        let text = params.get("text").and_then(Value::as_str).unwrap_or_default();
        let name = registry.get_name(uid);
        registry.broadcast(&Message::push(json!({
            "event": "public_message",
            "from_uid": uid,
            "from_name": name,
            "text": text,
        })));
        Ok(json!({"delivered": true}))
    });

    let registry = Arc::clone(sessions);
    router.add("send_private", move |params, uid| {
        let to_uid = params
            .get("to_uid")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| HandlerError::Shape("to_uid must be a u32".to_owned()))?;
        let text = params.get("text").and_then(Value::as_str).unwrap_or_default();
        let from = registry.get_name(uid);
        registry.send_to(
            &[to_uid],
            &Message::push(json!({
                "event": "private_message",
                "from_uid": uid,
                "from_name": from,
                "text": text,
            })),
        );
        Ok(json!({"delivered": true}))
    });

    router.add("ping", |_params, _uid| Ok(json!({"msg": "pong"})));
}
