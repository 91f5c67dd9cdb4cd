//! Session registry.
//!
//! A session binds a resident avatar to a WebSocket sender. The world task
//! owns this map; the transport only hands over an unbounded sender when a
//! socket opens and a close notification when it drops.

pub mod auth;

use std::collections::HashMap;

use thornvale_domain::ids::{AccountId, EntityId};
use thornvale_shared::{ClientUpdate, UpdateBatch};
use tokio::sync::mpsc::UnboundedSender;

/// One account's binding of avatar to transport.
pub struct SessionEntry {
    pub account: AccountId,
    pub username: String,
    pub avatar: EntityId,
    pub tx: UnboundedSender<String>,
    pub updates: Vec<ClientUpdate>,
    pub connected: bool,
}

/// Residency map: avatars stay resident across reconnects until the world
/// evicts them on disconnect handling.
#[derive(Default)]
pub struct SessionMap {
    by_account: HashMap<AccountId, SessionEntry>,
    by_avatar: HashMap<EntityId, AccountId>,
}

impl SessionMap {
    /// Bind (or rebind, on reconnect) a session. Returns the previously
    /// resident avatar when this is a reconnect.
    pub fn open(
        &mut self,
        account: AccountId,
        username: String,
        avatar: EntityId,
        tx: UnboundedSender<String>,
    ) -> Option<EntityId> {
        let resident = self.by_account.get(&account).map(|e| e.avatar);
        self.by_avatar.insert(avatar, account);
        self.by_account.insert(
            account,
            SessionEntry {
                account,
                username,
                avatar,
                tx,
                updates: Vec::new(),
                connected: true,
            },
        );
        resident
    }

    /// Mark a session disconnected, dropping its sender and buffer. The
    /// avatar stays resident for a fast reconnect.
    pub fn close(&mut self, account: AccountId) -> Option<EntityId> {
        let entry = self.by_account.get_mut(&account)?;
        entry.connected = false;
        entry.updates.clear();
        Some(entry.avatar)
    }

    /// Drop residency entirely (after persistence).
    pub fn evict(&mut self, account: AccountId) -> Option<EntityId> {
        let entry = self.by_account.remove(&account)?;
        self.by_avatar.remove(&entry.avatar);
        Some(entry.avatar)
    }

    pub fn resident_avatar(&self, account: AccountId) -> Option<EntityId> {
        self.by_account.get(&account).map(|e| e.avatar)
    }

    pub fn account_for(&self, avatar: EntityId) -> Option<AccountId> {
        self.by_avatar.get(&avatar).copied()
    }

    pub fn entry(&self, account: AccountId) -> Option<&SessionEntry> {
        self.by_account.get(&account)
    }

    pub fn is_connected(&self, avatar: EntityId) -> bool {
        self.account_for(avatar)
            .and_then(|a| self.by_account.get(&a))
            .is_some_and(|e| e.connected)
    }

    /// Queue an update for the avatar's session. Disconnected sessions
    /// accumulate nothing.
    pub fn push_update(&mut self, avatar: EntityId, update: ClientUpdate) {
        let Some(account) = self.by_avatar.get(&avatar) else {
            return;
        };
        let Some(entry) = self.by_account.get_mut(account) else {
            return;
        };
        if entry.connected {
            entry.updates.push(update);
        }
    }

    /// Send one `{"updates":[...]}` frame per session with a non-empty
    /// buffer, clearing the buffer.
    pub fn flush(&mut self) {
        for entry in self.by_account.values_mut() {
            if !entry.connected || entry.updates.is_empty() {
                continue;
            }
            let batch = UpdateBatch {
                updates: std::mem::take(&mut entry.updates),
            };
            match serde_json::to_string(&batch) {
                Ok(json) => {
                    if entry.tx.send(json).is_err() {
                        tracing::warn!(account = %entry.account, "session channel closed");
                        entry.connected = false;
                    }
                }
                Err(e) => tracing::error!(error = %e, "failed to serialize update batch"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn setup() -> (SessionMap, mpsc::UnboundedReceiver<String>) {
        let mut sessions = SessionMap::default();
        let (tx, rx) = mpsc::unbounded_channel();
        sessions.open(AccountId(1), "kara".into(), EntityId(10), tx);
        (sessions, rx)
    }

    #[test]
    fn one_frame_per_flush_in_enqueue_order() {
        let (mut sessions, mut rx) = setup();
        sessions.push_update(EntityId(10), ClientUpdate::ShowText { text: "A".into() });
        sessions.push_update(EntityId(10), ClientUpdate::ShowText { text: "B".into() });
        sessions.push_update(
            EntityId(10),
            ClientUpdate::ShowNotice { text: "C".into() },
        );
        sessions.flush();
        let frame = rx.try_recv().unwrap();
        let batch: UpdateBatch = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            batch.updates,
            vec![
                ClientUpdate::ShowText { text: "A".into() },
                ClientUpdate::ShowText { text: "B".into() },
                ClientUpdate::ShowNotice { text: "C".into() },
            ]
        );
        // Nothing further queued: no second frame.
        sessions.flush();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn empty_buffers_send_nothing() {
        let (mut sessions, mut rx) = setup();
        sessions.flush();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disconnected_sessions_accumulate_nothing() {
        let (mut sessions, mut rx) = setup();
        sessions.close(AccountId(1));
        sessions.push_update(EntityId(10), ClientUpdate::ShowText { text: "A".into() });
        sessions.flush();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reconnect_reports_the_resident_avatar() {
        let (mut sessions, _rx) = setup();
        sessions.close(AccountId(1));
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let resident = sessions.open(AccountId(1), "kara".into(), EntityId(10), tx2);
        assert_eq!(resident, Some(EntityId(10)));
        assert!(sessions.is_connected(EntityId(10)));
    }
}
