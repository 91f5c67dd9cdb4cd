//! Activities: multi-second actions with a casting bar, completion hooks,
//! and cancellation on movement or disconnect.
//!
//! Each activity carries a token; the scheduled completion callback checks
//! the token is still current before running, which is how cancellation
//! works without a cancel primitive in the scheduler.

use std::time::Duration;

use thornvale_domain::avatar::Activity;
use thornvale_domain::ids::EntityId;
use thornvale_domain::value::{Function, Value};
use thornvale_shared::ClientUpdate;

use crate::script::vm;

use super::World;

/// A completion or cancellation hook: either a script function called with
/// the avatar, or an engine closure.
pub enum ActivityHook {
    Script(Function),
    Engine(Box<dyn FnOnce(&mut World) + Send>),
}

impl ActivityHook {
    fn run(self, world: &mut World, avatar: EntityId) {
        match self {
            ActivityHook::Script(f) => {
                let result = vm::call_value(world, &f, vec![Value::Entity(avatar)]);
                if let Err(e) = result {
                    tracing::error!(error = %e, "activity hook failed");
                }
            }
            ActivityHook::Engine(f) => f(world),
        }
    }
}

/// Hooks held for a live activity.
pub struct ActivityHooks {
    pub avatar: EntityId,
    pub on_finish: ActivityHook,
    pub on_cancel: Option<ActivityHook>,
}

impl World {
    /// Start an activity for an avatar. Fails when the avatar is already
    /// busy or has a pending offer (the two are mutually exclusive).
    pub fn begin_activity(
        &mut self,
        avatar_id: EntityId,
        name: String,
        seconds: f64,
        on_finish: ActivityHook,
        on_cancel: Option<ActivityHook>,
    ) -> bool {
        let Some(avatar) = self.entity(avatar_id).and_then(|e| e.as_avatar()) else {
            return false;
        };
        if avatar.activity.is_some() || avatar.offer.is_some() {
            self.show_error(avatar_id, "You are busy.");
            return false;
        }
        let token = self.next_activity_token();
        if let Some(a) = self.entity_mut(avatar_id).and_then(|e| e.as_avatar_mut()) {
            a.activity = Some(Activity {
                name: name.clone(),
                token,
            });
        }
        self.activities.insert(
            token,
            ActivityHooks {
                avatar: avatar_id,
                on_finish,
                on_cancel,
            },
        );
        self.push_update(avatar_id, ClientUpdate::StartCast { name, seconds });
        self.schedule(Duration::from_secs_f64(seconds.max(0.0)), move |world| {
            world.finish_activity(avatar_id, token);
        });
        true
    }

    /// Completion callback: runs the finish hook iff the activity is still
    /// the one that was scheduled.
    fn finish_activity(&mut self, avatar_id: EntityId, token: u64) {
        let current = self
            .entity(avatar_id)
            .and_then(|e| e.as_avatar())
            .and_then(|a| a.activity.as_ref())
            .map(|a| a.token);
        if current != Some(token) {
            // Cancelled or replaced in the meantime.
            self.activities.remove(&token);
            return;
        }
        if let Some(a) = self.entity_mut(avatar_id).and_then(|e| e.as_avatar_mut()) {
            a.activity = None;
        }
        self.push_update(avatar_id, ClientUpdate::StopCast);
        if let Some(hooks) = self.activities.remove(&token) {
            hooks.on_finish.run(self, avatar_id);
        }
    }

    /// Cancel the avatar's current activity, invoking its cancel hook.
    pub fn cancel_activity(&mut self, avatar_id: EntityId) {
        let Some(token) = self
            .entity_mut(avatar_id)
            .and_then(|e| e.as_avatar_mut())
            .and_then(|a| a.activity.take())
            .map(|a| a.token)
        else {
            return;
        };
        self.push_update(avatar_id, ClientUpdate::StopCast);
        if let Some(hooks) = self.activities.remove(&token) {
            if let Some(on_cancel) = hooks.on_cancel {
                on_cancel.run(self, avatar_id);
            }
        }
    }
}
