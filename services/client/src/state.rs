//! Client-side chat state.
//!
//! Tracks the roster (uid → name) and the client's own identity, updated
//! from the login response, `client_list` results, and incoming pushes.
//! `apply_push` also renders the printable line for each event, so the
//! REPL stays a thin loop.

use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct ChatState {
    users: BTreeMap<u32, String>,
    my_uid: Option<u32>,
}

fn uid_of(value: &Value, key: &str) -> Option<u32> {
    value.get(key).and_then(Value::as_u64).and_then(|v| u32::try_from(v).ok())
}

fn str_of<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

impl ChatState {
    pub fn new() -> Self {
        ChatState::default()
    }

    pub fn my_uid(&self) -> Option<u32> {
        self.my_uid
    }

    /// Record our own identity from a successful login result.
    pub fn apply_login(&mut self, result: &Value) {
        if let Some(uid) = uid_of(result, "uid") {
            self.my_uid = Some(uid);
            self.users.insert(uid, str_of(result, "name").to_owned());
        }
    }

    /// Replace the roster from a `client_list` result.
    pub fn set_roster(&mut self, result: &Value) {
        let Some(clients) = result.get("clients").and_then(Value::as_array) else {
            return;
        };
        self.users.clear();
        for client in clients {
            if let Some(uid) = uid_of(client, "uid") {
                self.users.insert(uid, str_of(client, "name").to_owned());
            }
        }
    }

    /// Apply one push event; returns the line to print, if any.
    pub fn apply_push(&mut self, push: &Value) -> Option<String> {
        match str_of(push, "event") {
            "user_joined" => {
                let uid = uid_of(push, "uid")?;
                let name = str_of(push, "name").to_owned();
                let line = format!("* {name} joined (uid {uid})");
                self.users.insert(uid, name);
                Some(line)
            }
            "user_left" => {
                let uid = uid_of(push, "uid")?;
                let name = self
                    .users
                    .remove(&uid)
                    .unwrap_or_else(|| format!("uid {uid}"));
                Some(format!("* {name} left"))
            }
            "public_message" => Some(format!(
                "{}: {}",
                str_of(push, "from_name"),
                str_of(push, "text")
            )),
            "private_message" => Some(format!(
                "[PM] {}: {}",
                str_of(push, "from_name"),
                str_of(push, "text")
            )),
            _ => None,
        }
    }

    /// Roster lines for the `/list` command, sorted by uid.
    pub fn roster_lines(&self) -> Vec<String> {
        self.users
            .iter()
            .map(|(uid, name)| {
                if Some(*uid) == self.my_uid {
                    format!("  {uid}: {name} (you)")
                } else {
                    format!("  {uid}: {name}")
                }
            })
            .collect()
    }
}
