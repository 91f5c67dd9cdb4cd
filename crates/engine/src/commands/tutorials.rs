//! Tutorial preferences.

use thornvale_domain::ids::EntityId;

use crate::world::World;

use super::Binding;

/// `tutorials on|off|reset`.
pub fn tutorials(world: &mut World, actor: EntityId, _verb: &str, clauses: &[Option<Binding>]) {
    let mode = clauses
        .first()
        .and_then(|c| c.as_ref())
        .map(|b| b.text().to_lowercase());
    match mode.as_deref() {
        Some("on") => {
            if let Some(a) = world.entity_mut(actor).and_then(|e| e.as_avatar_mut()) {
                a.tutorials_on = true;
            }
            world.show_notice(actor, "Tutorials are on.");
        }
        Some("off") => {
            if let Some(a) = world.entity_mut(actor).and_then(|e| e.as_avatar_mut()) {
                a.tutorials_on = false;
            }
            world.show_notice(actor, "Tutorials are off.");
        }
        Some("reset") => {
            if let Some(a) = world.entity_mut(actor).and_then(|e| e.as_avatar_mut()) {
                a.tutorials_on = true;
                a.tutorials_seen.clear();
            }
            if let Some(account) = world.sessions.account_for(actor) {
                let store = world.store.clone();
                tokio::spawn(async move {
                    if let Err(e) = store.reset_tutorials(account).await {
                        tracing::error!(%account, error = %e, "tutorial reset failed");
                    }
                });
            }
            world.show_notice(actor, "Tutorials reset; you will see them again.");
        }
        _ => world.show_error(actor, "Usage: tutorials on|off|reset"),
    }
}
