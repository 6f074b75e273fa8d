//! The model graph for a workspace: [Entity]s by name, [Relation]s by unit, and
//! the [FileCache] that decides when a unit has to be extracted again.

use std::fmt::Debug;

use indexmap::IndexMap;
use qp_trie::{Trie, wrapper::BString};
use tracing::{debug, instrument, trace};

use crate::completions::{self, Candidate};
use crate::config::Settings;
use crate::data;
use crate::model::{Entity, Field, Location, Relation, UnitModels, reverse};
use crate::navigate;
use crate::scan::{RegexScanner, Scanner};
use crate::utils::{camel_case, is_capitalized};

mod cache;

pub use cache::{ContentHash, FileCache};

/// Entities and relations of every analyzed unit.
pub struct Graph {
	entities: IndexMap<String, Entity>,
	/// Relations grouped by the unit that declares them.
	relations: IndexMap<String, Vec<Relation>>,
	by_prefix: Trie<BString, String>,
}

impl Default for Graph {
	fn default() -> Self {
		Self {
			entities: IndexMap::new(),
			relations: IndexMap::new(),
			by_prefix: Trie::new(),
		}
	}
}

impl Debug for Graph {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Graph")
			.field("entities", &self.entities.keys().collect::<Vec<_>>())
			.field("relations", &self.relations.values().map(Vec::len).sum::<usize>())
			.finish_non_exhaustive()
	}
}

impl Graph {
	/// Inserts or replaces `entity` in place. Returns the entity it displaced.
	fn insert(&mut self, entity: Entity) -> Option<Entity> {
		self.by_prefix.insert_str(&entity.name, entity.name.clone());
		self.entities.insert(entity.name.clone(), entity)
	}

	fn remove_entities_of(&mut self, unit: &str) {
		let stale = self
			.entities
			.values()
			.filter(|entity| entity.source_unit == unit)
			.map(|entity| entity.name.clone())
			.collect::<Vec<_>>();
		for name in stale {
			self.entities.shift_remove(&name);
			self.by_prefix.remove_str(&name);
		}
	}

	/// Re-derives every reverse accessor in the graph.
	fn synthesize(&mut self) -> usize {
		reverse::synthesize(&mut self.entities, self.relations.values().flatten())
	}
}

/// The explicitly owned analysis state: graph, cache and settings.
#[derive(Debug)]
pub struct Index {
	graph: Graph,
	cache: FileCache,
	settings: Settings,
	/// Entity name to the unit whose definition of it lost to another unit's.
	shadowed: IndexMap<String, String>,
}

impl Default for Index {
	fn default() -> Self {
		Self::new(Settings::default())
	}
}

impl Index {
	pub fn new(settings: Settings) -> Self {
		Self {
			graph: Graph::default(),
			cache: FileCache::new(settings.cache_capacity, settings.cache_ttl),
			settings,
			shadowed: IndexMap::new(),
		}
	}

	#[inline]
	pub fn settings(&self) -> &Settings {
		&self.settings
	}

	pub fn configure(&mut self, settings: Settings) {
		self.cache.configure(settings.cache_capacity, settings.cache_ttl);
		self.settings = settings;
	}

	/// Whether the graph already holds exactly this content for `path`.
	pub fn is_fresh(&self, path: &str, hash: &ContentHash) -> bool {
		self.cache.is_fresh(path, hash)
	}

	pub fn analyze_unit(&mut self, text: &str, path: &str) {
		self.analyze_unit_with(&RegexScanner, text, path)
	}

	/// Extracts `text` unless it is cached, then swaps the result in.
	pub fn analyze_unit_with<S: Scanner>(&mut self, scanner: &S, text: &str, path: &str) {
		let hash = ContentHash::of(text);
		if self.is_fresh(path, &hash) {
			trace!(path, "unit unchanged");
			return;
		}
		let unit = UnitModels::extract(scanner, text, path);
		self.commit(unit, hash);
	}

	/// Replaces everything `unit.path` contributed with `unit`, then re-derives reverse accessors graph-wide.
	///
	/// This is the only step that touches the graph, so extraction can run elsewhere.
	/// Returns the units that must be analyzed again, see [Index::remove_unit].
	#[instrument(level = "debug", skip_all, fields(unit = %unit.path))]
	pub fn commit(&mut self, unit: UnitModels, hash: ContentHash) -> Vec<String> {
		let names = unit.entity_names();
		let UnitModels {
			path,
			entities,
			relations,
		} = unit;
		self.graph.remove_entities_of(&path);
		for entity in entities {
			let Some(displaced) = self.graph.insert(entity) else {
				continue;
			};
			if displaced.source_unit != path {
				debug!(
					entity = %displaced.name,
					previous = %displaced.source_unit,
					"entity redefined by another unit"
				);
				self.cache.evict(&displaced.source_unit);
				self.shadowed.insert(displaced.name.clone(), displaced.source_unit.clone());
				if let Some(stale) = self.graph.relations.get_mut(&displaced.source_unit) {
					stale.retain(|relation| relation.from_entity != displaced.name);
				}
			}
		}
		self.graph.relations.insert(path.clone(), relations);
		let count = names.len();
		self.cache.put(path, hash, names);
		let installed = self.graph.synthesize();
		debug!(entities = count, installed, "unit committed");
		self.unshadowed()
	}

	/// Forgets everything `path` contributed. Reverse accessors it induced disappear with it.
	///
	/// Returns the units whose definitions `path` had displaced. Their entities are
	/// missing from the graph until they are analyzed again.
	#[instrument(level = "debug", skip(self))]
	pub fn remove_unit(&mut self, path: &str) -> Vec<String> {
		self.graph.remove_entities_of(path);
		self.graph.relations.shift_remove(path);
		self.cache.evict(path);
		self.graph.synthesize();
		self.unshadowed()
	}

	/// Drops shadow records that no longer apply and collects the units whose
	/// displaced entity now has no definition at all.
	fn unshadowed(&mut self) -> Vec<String> {
		let mut orphaned = vec![];
		let entities = &self.graph.entities;
		self.shadowed.retain(|name, unit| match entities.get(name) {
			Some(entity) => entity.source_unit != *unit,
			None => {
				if !orphaned.contains(unit) {
					orphaned.push(unit.clone());
				}
				false
			}
		});
		if !orphaned.is_empty() {
			debug!(?orphaned, "displaced units need analysis");
		}
		orphaned
	}

	/// Ranked candidates for the cursor at the end of `preceding`.
	#[instrument(level = "trace", skip(self, preceding))]
	pub fn resolve_completions(&self, preceding: &str, unit: &str) -> Vec<Candidate> {
		completions::complete(self, preceding, unit)
	}

	/// Markdown for `word`, the identifier right after `preceding`.
	pub fn describe(&self, preceding: &str, word: &str, unit: &str) -> Option<String> {
		navigate::describe(self, preceding, word, unit)
	}

	/// Where `word`, the identifier right after `preceding`, is declared.
	pub fn locate(&self, preceding: &str, word: &str, unit: &str) -> Option<Location> {
		navigate::locate(self, preceding, word, unit)
	}

	#[inline]
	pub fn get_entity(&self, name: &str) -> Option<&Entity> {
		self.graph.entities.get(name)
	}

	#[inline]
	pub fn get_all_entities(&self) -> &IndexMap<String, Entity> {
		&self.graph.entities
	}

	/// Relations that start or end at `name`.
	pub fn get_relations_for(&self, name: &str) -> Vec<&Relation> {
		self.graph
			.relations
			.values()
			.flatten()
			.filter(|relation| relation.touches(name))
			.collect()
	}

	#[inline]
	/// See [Field::query_name].
	pub fn query_name(&self, field: &Field) -> String {
		field.query_name(field.related_entity.as_deref().and_then(|name| self.get_entity(name)))
	}

	/// The field of `entity` a `filter()` path segment names.
	pub fn filter_field<'a>(&'a self, entity: &'a Entity, segment: &str) -> Option<&'a Field> {
		entity.fields.iter().find(|field| self.query_name(field) == segment)
	}

	pub fn get_lookup_operators(&self, declared_type: &str) -> Vec<&'static str> {
		data::lookup_operators(declared_type)
	}

	/// Entities whose name starts with `prefix`, in trie order.
	pub fn entities_with_prefix<'a>(&'a self, prefix: &str) -> Box<dyn Iterator<Item = &'a Entity> + 'a> {
		if prefix.is_empty() {
			return Box::new(self.graph.entities.values());
		}
		let matches = self.graph.by_prefix.iter_prefix(prefix.as_bytes());
		Box::new(matches.filter_map(|(_, name)| self.graph.entities.get(name)))
	}

	/// Binds an identifier to an entity by name alone.
	///
	/// Exact match first, then case-insensitive, then `snake_case` to `CamelCase`,
	/// then a suffix match for capitalized names (`Post` finds `BlogPost`).
	/// Within each rule an entity from `unit` is preferred.
	pub fn find_entity(&self, ident: &str, unit: &str) -> Option<&Entity> {
		if let Some(entity) = self.get_entity(ident) {
			return Some(entity);
		}
		if ident.is_empty() {
			return None;
		}
		let camel = camel_case(ident);
		let rules: [&dyn Fn(&Entity) -> bool; 3] = [
			&|entity| entity.name.eq_ignore_ascii_case(ident),
			&|entity| entity.name == camel,
			&|entity| is_capitalized(ident) && entity.name.ends_with(ident),
		];
		for rule in rules {
			let mut matches = self.graph.entities.values().filter(|entity| rule(entity)).peekable();
			let Some(first) = matches.peek().copied() else {
				continue;
			};
			return Some(matches.find(|entity| entity.source_unit == unit).unwrap_or(first));
		}
		None
	}

	#[cfg(test)]
	pub(crate) fn cached_units(&self) -> usize {
		self.cache.len()
	}
}
