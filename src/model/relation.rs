use serde::Serialize;

use crate::model::{Entity, Field};
use crate::scan::{Arg, string_literal};
use crate::utils::is_capitalized;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RelationKind {
	/// `ForeignKey`
	ToOne,
	/// `OneToOneField`
	ToOneUnique,
	/// `ManyToManyField`
	ToMany,
}

impl RelationKind {
	pub fn of(declared_type: &str) -> Option<Self> {
		match declared_type {
			"ForeignKey" => Some(RelationKind::ToOne),
			"OneToOneField" => Some(RelationKind::ToOneUnique),
			"ManyToManyField" => Some(RelationKind::ToMany),
			_ => None,
		}
	}
}

/// The model a relation points to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Target {
	Entity(String),
	/// The target could not be read from the source, e.g. `settings.AUTH_USER_MODEL`.
	Unresolved,
}

impl Target {
	pub fn name(&self) -> Option<&str> {
		match self {
			Target::Entity(name) => Some(name),
			Target::Unresolved => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relation {
	pub from_entity: String,
	pub to_entity: Target,
	pub field_name: String,
	pub kind: RelationKind,
	pub explicit_reverse_name: Option<String>,
	pub source_unit: String,
}

impl Relation {
	/// Name of the accessor the target gains, or `None` when the reverse side is suppressed with `+`.
	pub fn reverse_accessor(&self) -> Option<String> {
		match &self.explicit_reverse_name {
			Some(name) if name.ends_with('+') => None,
			Some(name) => Some(name.clone()),
			None => Some(format!("{}_set", self.from_entity.to_lowercase())),
		}
	}

	pub fn touches(&self, entity: &str) -> bool {
		self.from_entity == entity || self.to_entity.name() == Some(entity)
	}
}

/// Resolves the target model named by a relational field's arguments.
///
/// `to=` wins over the first positional argument; `'self'` refers to `owner`.
pub fn resolve_target(args: &[Arg<'_>], owner: &str) -> Option<String> {
	let keyword = args.iter().find_map(|arg| match arg {
		Arg::Keyword("to", value) => Some(*value),
		_ => None,
	});
	let positional = || {
		args.iter().find_map(|arg| match arg {
			Arg::Positional(value) => Some(*value),
			_ => None,
		})
	};
	target_name(keyword.or_else(positional)?, owner)
}

fn target_name(expr: &str, owner: &str) -> Option<String> {
	if let Some(literal) = string_literal(expr) {
		let name = literal.rsplit('.').next().unwrap_or(literal);
		if name == "self" {
			return Some(owner.to_string());
		}
		return is_identifier(name).then(|| name.to_string());
	}
	let expr = expr.trim();
	if !expr.split('.').all(is_identifier) {
		return None;
	}
	let name = expr.rsplit('.').next()?;
	// `settings.AUTH_USER_MODEL` or `AUTH_USER_MODEL`, but not an acronym model like `FAQ`.
	let constant = !name.chars().any(char::is_lowercase) && (expr.contains('.') || name.contains('_'));
	if constant || (expr.contains('.') && !is_capitalized(name)) {
		return None;
	}
	Some(name.to_string())
}

fn is_identifier(name: &str) -> bool {
	let mut chars = name.chars();
	chars.next().is_some_and(|ch| ch.is_alphabetic() || ch == '_') && chars.all(|ch| ch.is_alphanumeric() || ch == '_')
}

fn explicit_reverse_name(field: &Field) -> Option<String> {
	let value = field.extra.get("related_name")?;
	string_literal(value).map(str::to_string)
}

/// The relation a field induces, if it is relational. Pure and repeatable.
pub fn relation_for(entity: &Entity, field: &Field) -> Option<Relation> {
	let kind = RelationKind::of(&field.declared_type)?;
	Some(Relation {
		from_entity: entity.name.clone(),
		to_entity: match &field.related_entity {
			Some(name) => Target::Entity(name.clone()),
			None => Target::Unresolved,
		},
		field_name: field.name.clone(),
		kind,
		explicit_reverse_name: explicit_reverse_name(field),
		source_unit: entity.source_unit.clone(),
	})
}

/// One relation per relational field of `entity`, inherited ones included.
pub fn relations_of(entity: &Entity) -> Vec<Relation> {
	entity
		.fields
		.iter()
		.filter(|field| !field.is_reverse())
		.filter_map(|field| relation_for(entity, field))
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::scan::{parse_arg, split_args};
	use pretty_assertions::assert_eq;

	fn target(args: &str) -> Option<String> {
		let args = split_args(args).into_iter().map(parse_arg).collect::<Vec<_>>();
		resolve_target(&args, "Category")
	}

	#[test]
	fn test_target_forms() {
		assert_eq!(target("'Author', on_delete=models.CASCADE").as_deref(), Some("Author"));
		assert_eq!(target("\"library.Author\"").as_deref(), Some("Author"));
		assert_eq!(target("Author, on_delete=models.CASCADE").as_deref(), Some("Author"));
		assert_eq!(target("on_delete=models.CASCADE, to='Tag'").as_deref(), Some("Tag"));
		assert_eq!(target("'self', null=True").as_deref(), Some("Category"));
		assert_eq!(target("auth.User").as_deref(), Some("User"));
		assert_eq!(target("FAQ, on_delete=models.CASCADE").as_deref(), Some("FAQ"));
		assert_eq!(target("'help.FAQ'").as_deref(), Some("FAQ"));
	}

	#[test]
	fn test_unresolvable_targets() {
		assert_eq!(target("settings.AUTH_USER_MODEL, on_delete=models.CASCADE"), None);
		assert_eq!(target("AUTH_USER_MODEL, on_delete=models.CASCADE"), None);
		assert_eq!(target("on_delete=models.CASCADE"), None);
		assert_eq!(target("get_model()"), None);
	}

	#[test]
	fn test_reverse_accessor() {
		let mut relation = Relation {
			from_entity: "BlogPost".to_string(),
			to_entity: Target::Entity("Author".to_string()),
			field_name: "author".to_string(),
			kind: RelationKind::ToOne,
			explicit_reverse_name: None,
			source_unit: "blog/models.py".to_string(),
		};
		assert_eq!(relation.reverse_accessor().as_deref(), Some("blogpost_set"));
		relation.explicit_reverse_name = Some("posts".to_string());
		assert_eq!(relation.reverse_accessor().as_deref(), Some("posts"));
		relation.explicit_reverse_name = Some("+".to_string());
		assert_eq!(relation.reverse_accessor(), None);
	}
}
