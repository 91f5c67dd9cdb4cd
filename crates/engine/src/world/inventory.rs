//! Inventory: bounded item storage with stacking, and the equipped map.

use thornvale_domain::ids::EntityId;
use thornvale_domain::refs::Ref;
use thornvale_shared::ClientUpdate;

use super::World;

impl World {
    /// The content ref an item stacks under: the nearest ref in its
    /// prototype chain.
    pub fn item_proto_ref(&self, item: EntityId) -> Option<Ref> {
        self.prototype_chain(item)
            .into_iter()
            .find_map(|id| self.entity_ref(id).cloned())
    }

    pub fn count_items(&self, avatar: EntityId, proto: &Ref) -> i64 {
        let Some(a) = self.entity(avatar).and_then(|e| e.as_avatar()) else {
            return 0;
        };
        a.inventory
            .iter()
            .filter(|id| self.item_proto_ref(**id).as_ref() == Some(proto))
            .map(|id| {
                self.entity(*id)
                    .and_then(|e| e.kind.item())
                    .map_or(0, |i| i.count)
            })
            .sum()
    }

    /// Add `count` of an item prototype to the avatar's inventory, stacking
    /// into existing stacks first. Returns false (and adds nothing) when the
    /// remainder would not fit.
    pub fn give_item(&mut self, avatar_id: EntityId, proto: EntityId, count: i64) -> bool {
        if count <= 0 {
            return true;
        }
        let Some(proto_ref) = self.item_proto_ref(proto) else {
            tracing::warn!(item = %proto, "gave an item with no content ref");
            return false;
        };
        let stack_limit = self
            .entity(proto)
            .and_then(|e| e.kind.item())
            .map_or(1, |i| i.stack_limit.max(1));

        let Some(a) = self.entity(avatar_id).and_then(|e| e.as_avatar()) else {
            return false;
        };
        let capacity = a.capacity;
        let inventory = a.inventory.clone();

        // Room in existing stacks, then whole new stacks.
        let mut room = 0;
        let mut partial: Vec<(EntityId, i64)> = Vec::new();
        for id in &inventory {
            if self.item_proto_ref(*id).as_ref() != Some(&proto_ref) {
                continue;
            }
            let current = self
                .entity(*id)
                .and_then(|e| e.kind.item())
                .map_or(0, |i| i.count);
            if current < stack_limit {
                partial.push((*id, stack_limit - current));
                room += stack_limit - current;
            }
        }
        let free_slots = capacity.saturating_sub(inventory.len()) as i64;
        if room + free_slots * stack_limit < count {
            return false;
        }

        let mut remaining = count;
        for (id, space) in partial {
            if remaining == 0 {
                break;
            }
            let add = space.min(remaining);
            remaining -= add;
            if let Some(facet) = self.entity_mut(id).and_then(|e| e.kind.item_mut()) {
                facet.count += add;
            }
            let info = self.item_info(id);
            self.push_update(avatar_id, ClientUpdate::UpdateItem { item: info });
        }
        while remaining > 0 {
            let add = remaining.min(stack_limit);
            remaining -= add;
            let Some(id) = self.clone_entity_from(proto) else {
                return false;
            };
            if let Some(facet) = self.entity_mut(id).and_then(|e| e.kind.item_mut()) {
                facet.count = add;
            }
            if let Some(a) = self.entity_mut(avatar_id).and_then(|e| e.as_avatar_mut()) {
                a.inventory.push(id);
            }
            let info = self.item_info(id);
            self.push_update(avatar_id, ClientUpdate::UpdateItem { item: info });
        }
        true
    }

    /// Remove `count` matching items, draining stacks front to back.
    /// Returns false (and removes nothing) when the avatar has too few.
    pub fn remove_item(&mut self, avatar_id: EntityId, proto: &Ref, count: i64) -> bool {
        if self.count_items(avatar_id, proto) < count {
            return false;
        }
        let Some(a) = self.entity(avatar_id).and_then(|e| e.as_avatar()) else {
            return false;
        };
        let inventory = a.inventory.clone();
        let mut remaining = count;
        for id in inventory {
            if remaining == 0 {
                break;
            }
            if self.item_proto_ref(id).as_ref() != Some(proto) {
                continue;
            }
            let current = self
                .entity(id)
                .and_then(|e| e.kind.item())
                .map_or(0, |i| i.count);
            let take = current.min(remaining);
            remaining -= take;
            if take == current {
                if let Some(a) = self.entity_mut(avatar_id).and_then(|e| e.as_avatar_mut()) {
                    a.inventory.retain(|i| *i != id);
                }
                self.remove_entity(id);
                self.push_update(avatar_id, ClientUpdate::RemoveItem { key: id.0 });
            } else {
                if let Some(facet) = self.entity_mut(id).and_then(|e| e.kind.item_mut()) {
                    facet.count = current - take;
                }
                let info = self.item_info(id);
                self.push_update(avatar_id, ClientUpdate::UpdateItem { item: info });
            }
        }
        true
    }

    /// Move a loose item entity from the avatar's location into inventory.
    /// The item entity keeps its identity (no restacking on pickup).
    pub fn take_item(&mut self, avatar_id: EntityId, item: EntityId) -> bool {
        let Some(a) = self.entity(avatar_id).and_then(|e| e.as_avatar()) else {
            return false;
        };
        if a.inventory.len() >= a.capacity {
            self.show_error(avatar_id, "Your pack is full.");
            return false;
        }
        self.remove_from_location(item);
        if let Some(a) = self.entity_mut(avatar_id).and_then(|e| e.as_avatar_mut()) {
            a.inventory.push(item);
        }
        let info = self.item_info(item);
        self.push_update(avatar_id, ClientUpdate::UpdateItem { item: info });
        let location = self.location_of(avatar_id);
        if let Some(location) = location {
            for other in self.avatars_in(location) {
                if other != avatar_id {
                    self.push_update(other, ClientUpdate::RemoveNeighbor { key: item.0 });
                }
            }
        }
        true
    }

    /// Move an inventory item onto the floor of the avatar's location.
    pub fn drop_item(&mut self, avatar_id: EntityId, item: EntityId) -> bool {
        let Some(location) = self.location_of(avatar_id) else {
            return false;
        };
        let Some(a) = self.entity_mut(avatar_id).and_then(|e| e.as_avatar_mut()) else {
            return false;
        };
        if !a.inventory.contains(&item) {
            return false;
        }
        a.inventory.retain(|i| *i != item);
        self.place(item, location);
        self.push_update(avatar_id, ClientUpdate::RemoveItem { key: item.0 });
        let info = self.neighbor_info(item);
        for other in self.avatars_in(location) {
            if other != avatar_id {
                self.push_update(
                    other,
                    ClientUpdate::UpdateNeighbor {
                        neighbor: info.clone(),
                    },
                );
            }
        }
        true
    }

    /// Hand an inventory item to another avatar (or creature).
    pub fn transfer_item(&mut self, from: EntityId, item: EntityId, to: EntityId) -> bool {
        let Some(a) = self.entity_mut(from).and_then(|e| e.as_avatar_mut()) else {
            return false;
        };
        if !a.inventory.contains(&item) {
            return false;
        }
        if let Some(receiver) = self.entity(to).and_then(|e| e.as_avatar()) {
            if receiver.inventory.len() >= receiver.capacity {
                self.show_error(from, "They can't carry any more.");
                return false;
            }
        }
        if let Some(a) = self.entity_mut(from).and_then(|e| e.as_avatar_mut()) {
            a.inventory.retain(|i| *i != item);
        }
        self.push_update(from, ClientUpdate::RemoveItem { key: item.0 });
        if let Some(b) = self.entity_mut(to).and_then(|e| e.as_avatar_mut()) {
            b.inventory.push(item);
            let info = self.item_info(item);
            self.push_update(to, ClientUpdate::UpdateItem { item: info });
        } else {
            // Creatures consume what they're given; handlers decide what
            // happens, the item just leaves play.
            self.remove_entity(item);
        }
        true
    }

    /// Equip an inventory item into its slot, swapping out whatever was
    /// there. Fails for items that are not equipment or carry no slot.
    pub fn equip_item(&mut self, avatar_id: EntityId, item: EntityId) -> Result<(), String> {
        let Some(slot) = self
            .entity(item)
            .and_then(|e| e.kind.equipment())
            .and_then(|eq| eq.slot.clone())
        else {
            return Err("You can't equip that.".to_string());
        };
        let Some(a) = self.entity_mut(avatar_id).and_then(|e| e.as_avatar_mut()) else {
            return Err("You can't equip that.".to_string());
        };
        if !a.inventory.contains(&item) {
            return Err("You aren't carrying that.".to_string());
        }
        a.inventory.retain(|i| *i != item);
        let displaced = a.equipped.insert(slot.clone(), item);
        if let Some(old) = displaced {
            a.inventory.push(old);
            self.push_update(avatar_id, ClientUpdate::Unequip { slot: slot.clone() });
            let info = self.item_info(old);
            self.push_update(avatar_id, ClientUpdate::UpdateItem { item: info });
        }
        self.push_update(avatar_id, ClientUpdate::RemoveItem { key: item.0 });
        let info = self.equipment_info(&slot, item);
        self.push_update(avatar_id, ClientUpdate::Equip { item: info });
        Ok(())
    }

    pub fn unequip_slot(&mut self, avatar_id: EntityId, slot: &str) -> Result<(), String> {
        let Some(a) = self.entity_mut(avatar_id).and_then(|e| e.as_avatar_mut()) else {
            return Err("Nothing to unequip.".to_string());
        };
        let Some(item) = a.equipped.remove(slot) else {
            return Err("Nothing to unequip.".to_string());
        };
        if a.inventory.len() >= a.capacity {
            a.equipped.insert(slot.to_string(), item);
            return Err("Your pack is full.".to_string());
        }
        a.inventory.push(item);
        self.push_update(
            avatar_id,
            ClientUpdate::Unequip {
                slot: slot.to_string(),
            },
        );
        let info = self.item_info(item);
        self.push_update(avatar_id, ClientUpdate::UpdateItem { item: info });
        Ok(())
    }
}
