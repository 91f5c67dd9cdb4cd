//! Auth endpoint payloads.

use serde::{Deserialize, Serialize};

/// Body of successful `/game/create`, `/game/login`, and `/game/auth`
/// responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameResponse {
    pub username: String,
}
