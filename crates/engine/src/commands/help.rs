//! The help command.

use thornvale_domain::ids::EntityId;
use thornvale_shared::ClientUpdate;

use crate::world::World;

use super::Binding;

pub fn help(world: &mut World, actor: EntityId, _verb: &str, clauses: &[Option<Binding>]) {
    if let Some(topic) = clauses.first().and_then(|c| c.as_ref()) {
        world.show(
            actor,
            format!(
                "No help on \"{}\" yet. Type help for the command list.",
                topic.text()
            ),
        );
        return;
    }
    let mut links: Vec<String> = world.commands.verbs().iter().map(|v| v.to_string()).collect();
    links.dedup();
    world.push_update(
        actor,
        ClientUpdate::ShowLinks {
            heading: "Commands:".to_string(),
            links,
        },
    );
}
