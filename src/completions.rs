//! Projects a classified [Context] onto a ranked, deduplicated candidate list.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::analyze::{Context, classify};
use crate::data::{
	self, DEFAULT_METHODS, FIELD_TYPES, FILTER_CALLS, QUERYSET_OPS, QuerySetOp, RELATED_MANAGER_OPS, REVERSE_COLLECTION,
};
use crate::index::Index;
use crate::model::{Entity, Field, ManagerKind, Method};
use crate::utils::{DisplayExt, MaxVec};

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CandidateKind {
	Field,
	Lookup,
	Method,
	Property,
	QuerySetOp,
	Entity,
	FieldType,
}

/// How the editor should insert a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Insertion {
	/// The name alone.
	Bare,
	/// `name=`, for query keyword arguments.
	Keyword,
	/// `name()`, with the cursor inside the parentheses when `args` is set.
	Call { args: bool },
	/// `name('')`, for calls taking field names.
	QuotedCall,
	/// `name__`, asking the editor to complete again.
	Traverse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
	pub name: String,
	pub kind: CandidateKind,
	pub detail: String,
	pub insertion: Insertion,
	pub documentation: Option<String>,
}

/// Bounded, prefix-filtered sink; the first candidate of a name wins.
struct Projection<'p> {
	items: MaxVec<Candidate>,
	seen: HashSet<String>,
	prefix: &'p str,
}

impl<'p> Projection<'p> {
	fn new(limit: usize, prefix: &'p str) -> Self {
		Self {
			items: MaxVec::new(limit),
			seen: HashSet::new(),
			prefix,
		}
	}

	fn push(&mut self, candidate: Candidate) {
		if !self.items.has_space() || !candidate.name.starts_with(self.prefix) {
			return;
		}
		if self.seen.insert(candidate.name.clone()) {
			self.items.push_checked(candidate);
		}
	}
}

pub fn complete(index: &Index, preceding: &str, unit: &str) -> Vec<Candidate> {
	let Some(context) = classify(index, preceding, unit) else {
		return vec![];
	};
	debug!(
		kind = context.kind(),
		entity = %context.entity().map(|entity| &entity.name).display(),
		prefix = context.prefix(),
		"classified"
	);
	let mut out = Projection::new(index.settings().completions_limit, context.prefix());
	match context {
		Context::EntityName { prefix } => entity_names(index, prefix, &mut out),
		Context::FieldType { .. } => field_types(&mut out),
		Context::FilterKwargs { entity: Some(entity), .. } => filter_kwargs(index, entity, &mut out),
		Context::ManagerChain {
			entity: Some(entity),
			manager,
			..
		} => manager_chain(entity, manager, &mut out),
		Context::RelatedFieldChain { entity, field, .. } => related_field_chain(index, entity, field, &mut out),
		Context::InstanceAccess { entity: Some(entity), .. } => instance_access(entity, &mut out),
		Context::FilterKwargs { entity: None, .. }
		| Context::ManagerChain { entity: None, .. }
		| Context::InstanceAccess { entity: None, .. } => {}
	}
	out.items.into_inner()
}

fn entity_names(index: &Index, prefix: &str, out: &mut Projection) {
	for entity in index.entities_with_prefix(prefix) {
		let detail = match &entity.app {
			Some(app) => format!("{app} model"),
			None => "Model".to_string(),
		};
		out.push(Candidate {
			name: entity.name.clone(),
			kind: CandidateKind::Entity,
			detail,
			insertion: Insertion::Bare,
			documentation: Some(entity.location.to_string()),
		});
	}
}

fn field_types(out: &mut Projection) {
	let mut types = FIELD_TYPES
		.entries()
		.filter(|(name, _)| **name != REVERSE_COLLECTION)
		.collect::<Vec<_>>();
	types.sort_unstable_by_key(|(name, _)| *name);
	for (name, ty) in types {
		out.push(Candidate {
			name: name.to_string(),
			kind: CandidateKind::FieldType,
			detail: ty.description.to_string(),
			insertion: Insertion::Call { args: true },
			documentation: None,
		});
	}
}

fn field_candidate(name: String, field: &Field, insertion: Insertion) -> Candidate {
	let detail = if field.is_reverse() {
		format!("Reverse relation from {}", field.related_entity.as_deref().display())
	} else {
		format!("{} field", field.declared_type)
	};
	Candidate {
		name,
		kind: CandidateKind::Field,
		detail,
		insertion,
		documentation: field.help_text.clone(),
	}
}

fn lookups(path: &str, field: &Field, out: &mut Projection) {
	for op in data::lookup_operators(&field.declared_type) {
		out.push(Candidate {
			name: format!("{path}__{op}"),
			kind: CandidateKind::Lookup,
			detail: format!("{} lookup", field.declared_type),
			insertion: Insertion::Keyword,
			documentation: None,
		});
	}
}

fn filter_kwargs(index: &Index, entity: &Entity, out: &mut Projection) {
	for field in &entity.fields {
		let name = index.query_name(field);
		out.push(field_candidate(name.clone(), field, Insertion::Keyword));
		lookups(&name, field, out);
		if !field.is_relational() && !field.is_reverse() {
			continue;
		}
		let related = field.related_entity.as_deref().and_then(|name| index.get_entity(name));
		let Some(related) = related else {
			out.push(Candidate {
				name: format!("{name}__"),
				kind: CandidateKind::Field,
				detail: "Related lookup".to_string(),
				insertion: Insertion::Traverse,
				documentation: None,
			});
			continue;
		};
		for related_field in related.fields.iter().filter(|related_field| !related_field.is_reverse()) {
			let path = format!("{name}__{}", related_field.name);
			out.push(field_candidate(path.clone(), related_field, Insertion::Keyword));
			lookups(&path, related_field, out);
		}
	}
}

fn queryset_op(op: &QuerySetOp, out: &mut Projection) {
	let insertion = if FILTER_CALLS.contains(op.name) {
		Insertion::Call { args: true }
	} else if matches!(op.name, "order_by" | "values" | "values_list") {
		Insertion::QuotedCall
	} else {
		Insertion::Call {
			args: !op.signature.starts_with("()"),
		}
	};
	out.push(Candidate {
		name: op.name.to_string(),
		kind: CandidateKind::QuerySetOp,
		detail: op.signature.to_string(),
		insertion,
		documentation: Some(op.doc.to_string()),
	});
}

fn manager_chain(entity: &Entity, manager: Option<&str>, out: &mut Projection) {
	let manager = match manager {
		Some(name) => match entity.manager(name) {
			Some(manager) => Some(manager),
			None => {
				debug!(entity = %entity.name, manager = name, "no such manager");
				return;
			}
		},
		None => None,
	};
	for op in QUERYSET_OPS {
		queryset_op(op, out);
	}
	let Some(manager) = manager else {
		return;
	};
	match manager.kind {
		ManagerKind::Default => {}
		ManagerKind::Custom => {
			for method in &manager.methods {
				out.push(Candidate {
					name: method.clone(),
					kind: CandidateKind::Method,
					detail: "Custom manager method".to_string(),
					insertion: Insertion::Call { args: true },
					documentation: manager.class.clone(),
				});
			}
		}
		ManagerKind::SynthesizedReverse => {
			for op in RELATED_MANAGER_OPS {
				queryset_op(op, out);
			}
		}
	}
}

fn related_field_chain(index: &Index, entity: &Entity, field: &str, out: &mut Projection) {
	let target = entity
		.field(field)
		.and_then(|field| field.related_entity.as_deref())
		.and_then(|name| index.get_entity(name));
	let Some(target) = target else {
		debug!(entity = %entity.name, field, "unresolved relation");
		return;
	};
	instance_access(target, out);
}

fn method_candidate(method: &Method) -> Candidate {
	let documentation = DEFAULT_METHODS
		.iter()
		.find(|default| method.location.is_none() && default.name == method.name)
		.map(|default| default.doc.to_string());
	if method.is_property() {
		return Candidate {
			name: method.name.clone(),
			kind: CandidateKind::Property,
			detail: "property".to_string(),
			insertion: Insertion::Bare,
			documentation,
		};
	}
	Candidate {
		name: method.name.clone(),
		kind: CandidateKind::Method,
		detail: method.signature(),
		insertion: Insertion::Call {
			args: !method.params.is_empty(),
		},
		documentation,
	}
}

fn instance_access(entity: &Entity, out: &mut Projection) {
	for field in &entity.fields {
		out.push(field_candidate(field.name.clone(), field, Insertion::Bare));
	}
	for method in &entity.methods {
		out.push(method_candidate(method));
	}
	for property in &entity.properties {
		out.push(Candidate {
			name: property.clone(),
			kind: CandidateKind::Property,
			detail: "property".to_string(),
			insertion: Insertion::Bare,
			documentation: None,
		});
	}
}
