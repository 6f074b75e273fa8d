//! Reverse accessors installed on relation targets.

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use super::{Entity, Field, Manager, ManagerKind, Relation};

/// Drops every synthetic field and manager.
pub fn strip(entities: &mut IndexMap<String, Entity>) {
	for entity in entities.values_mut() {
		entity.fields.retain(|field| !field.is_reverse());
		entity
			.managers
			.retain(|manager| manager.kind != ManagerKind::SynthesizedReverse);
	}
}

/// Rebuilds reverse accessors from scratch for `relations`. Returns how many were installed.
///
/// Stripping first keeps the result a function of the current relations only:
/// accessors of relations that disappeared go away, and repeated runs converge.
pub fn synthesize<'r>(
	entities: &mut IndexMap<String, Entity>,
	relations: impl IntoIterator<Item = &'r Relation>,
) -> usize {
	strip(entities);
	let mut installed = 0;
	for relation in relations {
		let Some(target) = relation.to_entity.name() else {
			trace!(from = %relation.from_entity, field = %relation.field_name, "unresolved target");
			continue;
		};
		let Some(accessor) = relation.reverse_accessor() else {
			continue;
		};
		// Concrete descendants carry their own copy of the relation.
		if entities.get(&relation.from_entity).is_some_and(|from| from.is_abstract) {
			continue;
		}
		let Some(entity) = entities.get_mut(target) else {
			trace!(target, "target not in graph");
			continue;
		};
		match entity.field(&accessor) {
			Some(field) if field.is_reverse() => {
				debug!(target, %accessor, from = %relation.from_entity, "reverse accessor already installed");
				continue;
			}
			Some(_) => {
				warn!(
					target,
					%accessor,
					from = %relation.from_entity,
					"reverse accessor clashes with a declared field"
				);
				continue;
			}
			None => {}
		}
		entity
			.fields
			.push(Field::reverse(accessor.clone(), &relation.from_entity, &relation.field_name));
		if entity.manager(&accessor).is_none() {
			entity.managers.push(Manager {
				name: accessor,
				kind: ManagerKind::SynthesizedReverse,
				class: None,
				methods: vec![],
			});
		}
		installed += 1;
	}
	installed
}
