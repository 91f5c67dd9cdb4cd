//! Movement: placing entities, traveling through portals, and the
//! enter/exit event pair.

use thornvale_domain::ids::EntityId;
use thornvale_domain::value::Value;
use thornvale_shared::ClientUpdate;

use super::World;

impl World {
    /// Put an entity into a location's contents without ceremony. Used by
    /// the loader and by scripts spawning scenery.
    pub fn place(&mut self, entity: EntityId, location: EntityId) {
        if let Some(l) = self.entity_mut(location).and_then(|e| e.as_location_mut()) {
            if !l.contents.contains(&entity) {
                l.contents.push(entity);
            }
        }
        if let Some(a) = self.entity_mut(entity).and_then(|e| e.as_avatar_mut()) {
            a.location = Some(location);
        }
    }

    pub fn remove_from_location(&mut self, entity: EntityId) {
        let Some(location) = self.location_of(entity) else {
            return;
        };
        if let Some(l) = self.entity_mut(location).and_then(|e| e.as_location_mut()) {
            l.contents.retain(|id| *id != entity);
        }
    }

    /// The destination location of a portal, resolved through its ref.
    pub fn portal_destination(&self, portal: EntityId) -> Option<EntityId> {
        let dest_ref = self
            .entity(portal)
            .and_then(|e| e.as_portal())
            .and_then(|p| p.destination.clone())?;
        let module = dest_ref.module()?;
        match self.module_binding(module, dest_ref.name()) {
            Some(Value::Entity(id)) => Some(id),
            _ => None,
        }
    }

    /// Move an avatar through a portal. Returns false when the exit event is
    /// vetoed; content handlers are responsible for explaining why.
    pub fn travel(&mut self, avatar: EntityId, portal: EntityId) -> bool {
        let Some(origin) = self.location_of(avatar) else {
            return false;
        };
        let Some(destination) = self.portal_destination(portal) else {
            tracing::warn!(portal = %portal, "portal has no resolvable destination");
            self.show_error(avatar, "That way leads nowhere.");
            return false;
        };

        // A location change abandons whatever was pending.
        self.decline_offer_silently(avatar);
        self.cancel_activity(avatar);

        let args = vec![
            Value::Entity(avatar),
            Value::Entity(origin),
            Value::Entity(portal),
        ];
        let left = self.trigger_event("exit_location", origin, &[avatar, portal], &args, |w| {
            w.remove_from_location(avatar);
            for other in w.avatars_in(origin) {
                w.push_update(other, ClientUpdate::RemoveNeighbor { key: avatar.0 });
            }
        });
        if !left {
            return false;
        }

        let via = self
            .entity(portal)
            .and_then(|e| e.as_portal())
            .and_then(|p| p.twin);
        self.arrive(avatar, destination, via);
        true
    }

    /// Insert an avatar into a location under an `enter_location` event and
    /// refresh its view. `via` is the portal it came through, if any.
    pub fn arrive(&mut self, avatar: EntityId, destination: EntityId, via: Option<EntityId>) {
        let mut participants = vec![avatar];
        let mut args = vec![Value::Entity(avatar), Value::Entity(destination)];
        if let Some(p) = via {
            participants.push(p);
            args.push(Value::Entity(p));
        }
        self.trigger_event("enter_location", destination, &participants, &args, |w| {
            w.place(avatar, destination);
            let info = w.neighbor_info(avatar);
            for other in w.avatars_in(destination) {
                if other != avatar {
                    w.push_update(
                        other,
                        ClientUpdate::UpdateNeighbor {
                            neighbor: info.clone(),
                        },
                    );
                }
            }
            w.show_location(avatar);
            w.show_tutorial_once(avatar, destination);
        });
    }

    /// Show a location's tutorial text the first time a tutorials-on avatar
    /// arrives, and journal it.
    pub(crate) fn show_tutorial_once(&mut self, avatar_id: EntityId, location: EntityId) {
        let Some(text) = self
            .entity(location)
            .and_then(|e| e.as_location())
            .and_then(|l| l.tutorial.clone())
        else {
            return;
        };
        let key = match self.entity_ref(location) {
            Some(r) => r.to_string(),
            None => format!("loc:{}", location.0),
        };
        let Some(avatar) = self.entity_mut(avatar_id).and_then(|e| e.as_avatar_mut()) else {
            return;
        };
        if !avatar.tutorials_on || avatar.tutorials_seen.contains(&key) {
            return;
        }
        avatar.tutorials_seen.insert(key);
        self.push_update(avatar_id, ClientUpdate::ShowTutorial { text });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::test_support::*;
    use thornvale_domain::entities::Direction;
    use thornvale_domain::ids::AccountId;
    use thornvale_domain::refs::Ref;
    use tokio::sync::mpsc;

    fn linked_rooms(world: &mut World) -> (EntityId, EntityId, EntityId) {
        let yard = add_location(world, "yard");
        let road = add_location(world, "road");
        let road_ref = world.entity_ref(road).unwrap().clone();
        let yard_ref = world.entity_ref(yard).unwrap().clone();
        let gate = add_portal(world, yard, Direction::North, road_ref);
        let back = add_portal(world, road, Direction::South, yard_ref);
        world
            .entity_mut(gate)
            .unwrap()
            .as_portal_mut()
            .unwrap()
            .twin = Some(back);
        world
            .entity_mut(back)
            .unwrap()
            .as_portal_mut()
            .unwrap()
            .twin = Some(gate);
        (yard, road, gate)
    }

    #[test]
    fn travel_moves_the_avatar_and_updates_views() {
        let mut world = empty_world();
        let (yard, road, gate) = linked_rooms(&mut world);
        let avatar = add_avatar(&mut world, yard, "traveler");
        let (tx, _rx) = mpsc::unbounded_channel();
        world.sessions.open(AccountId(1), "t".into(), avatar, tx);

        assert!(world.travel(avatar, gate));
        assert_eq!(world.location_of(avatar), Some(road));
        assert!(!world
            .entity(yard)
            .unwrap()
            .as_location()
            .unwrap()
            .contents
            .contains(&avatar));
        let updates = &world.sessions.entry(AccountId(1)).unwrap().updates;
        assert!(updates
            .iter()
            .any(|u| matches!(u, ClientUpdate::ShowLocation { name, .. } if name == "road")));
    }

    #[test]
    fn travel_without_destination_fails_gracefully() {
        let mut world = empty_world();
        let yard = add_location(&mut world, "yard");
        let gate = add_portal(
            &mut world,
            yard,
            Direction::North,
            Ref::absolute("test", "nowhere"),
        );
        let avatar = add_avatar(&mut world, yard, "traveler");
        assert!(!world.travel(avatar, gate));
        assert_eq!(world.location_of(avatar), Some(yard));
    }

    #[test]
    fn tutorial_shows_once_and_respects_the_flag() {
        let mut world = empty_world();
        let yard = add_location(&mut world, "yard");
        world.entity_mut(yard).unwrap().as_location_mut().unwrap().tutorial =
            Some("Try 'look'.".to_string());
        let avatar = add_avatar(&mut world, yard, "traveler");
        let (tx, _rx) = mpsc::unbounded_channel();
        world.sessions.open(AccountId(1), "t".into(), avatar, tx);

        world.show_tutorial_once(avatar, yard);
        world.show_tutorial_once(avatar, yard);
        let tutorials = world
            .sessions
            .entry(AccountId(1))
            .unwrap()
            .updates
            .iter()
            .filter(|u| matches!(u, ClientUpdate::ShowTutorial { .. }))
            .count();
        assert_eq!(tutorials, 1);
    }
}
