//! Accepting and declining quest offers.

use thornvale_domain::ids::EntityId;

use crate::world::World;

use super::Binding;

pub fn accept(world: &mut World, actor: EntityId, _verb: &str, _clauses: &[Option<Binding>]) {
    world.accept_offer(actor);
}

pub fn decline(world: &mut World, actor: EntityId, _verb: &str, _clauses: &[Option<Binding>]) {
    world.decline_offer(actor);
}
