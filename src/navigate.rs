//! Hover text and go-to-definition for the identifier under the cursor.

use fomat_macros::fomat;
use tracing::trace;

use crate::analyze::{Context, classify, is_ident_char};
use crate::data::{self, DEFAULT_METHODS, FIELD_TYPES, FieldType, QuerySetOp, RELATED_MANAGER_OPS};
use crate::index::Index;
use crate::model::{Entity, Field, Location, Manager, ManagerKind, Method, Origin};

/// What an identifier turned out to name.
#[derive(Debug, Clone, Copy)]
enum Symbol<'a> {
	Entity(&'a Entity),
	Field(&'a Entity, &'a Field),
	Method(&'a Entity, &'a Method),
	Property(&'a Entity, &'a str),
	Manager(&'a Entity, &'a Manager),
	/// A custom method of a declared manager.
	ManagerMethod(&'a Manager, &'a str),
	QuerySetOp(&'a QuerySetOp),
	Lookup(&'a Field, &'a str),
	FieldType(&'a str, &'a FieldType),
}

fn member<'a>(entity: &'a Entity, word: &str) -> Option<Symbol<'a>> {
	if let Some(field) = entity.field(word) {
		return Some(Symbol::Field(entity, field));
	}
	if let Some(method) = entity.method(word) {
		return Some(Symbol::Method(entity, method));
	}
	if let Some(manager) = entity.manager(word) {
		return Some(Symbol::Manager(entity, manager));
	}
	let property = entity.properties.iter().find(|property| *property == word)?;
	Some(Symbol::Property(entity, property))
}

/// Walks `author__name__icontains` from `entity`, one relation per segment.
fn lookup_path<'a>(index: &'a Index, mut entity: &'a Entity, word: &str) -> Option<Symbol<'a>> {
	let mut parts = word.split("__").peekable();
	while let Some(part) = parts.next() {
		let field = index.filter_field(entity, part)?;
		let Some(next) = parts.peek().copied() else {
			return Some(Symbol::Field(entity, field));
		};
		let related = field.related_entity.as_deref().and_then(|name| index.get_entity(name));
		match related {
			Some(related) if index.filter_field(related, next).is_some() => entity = related,
			_ => {
				let op = data::lookup_operators(&field.declared_type)
					.into_iter()
					.find(|op| *op == next)?;
				return parts.nth(1).is_none().then_some(Symbol::Lookup(field, op));
			}
		}
	}
	None
}

fn manager_member<'a>(entity: &'a Entity, manager: Option<&str>, word: &str) -> Option<Symbol<'a>> {
	let manager = match manager {
		Some(name) => Some(entity.manager(name)?),
		None => None,
	};
	if let Some(manager) = manager {
		if let Some(method) = manager.methods.iter().find(|method| *method == word) {
			return Some(Symbol::ManagerMethod(manager, method));
		}
		if manager.kind == ManagerKind::SynthesizedReverse {
			if let Some(op) = RELATED_MANAGER_OPS.iter().find(|op| op.name == word) {
				return Some(Symbol::QuerySetOp(op));
			}
		}
	}
	data::queryset_op(word).map(Symbol::QuerySetOp)
}

fn symbol_at<'a>(index: &'a Index, preceding: &'a str, word: &str, unit: &'a str) -> Option<Symbol<'a>> {
	let context = classify(index, preceding, unit);
	trace!(kind = context.as_ref().map(Context::kind), word, "symbol lookup");
	match context {
		Some(Context::EntityName { .. }) => index.find_entity(word, unit).map(Symbol::Entity),
		Some(Context::FieldType { .. }) => {
			let (name, ty) = FIELD_TYPES.get_entry(word)?;
			Some(Symbol::FieldType(name, ty))
		}
		Some(Context::FilterKwargs { entity, .. }) => lookup_path(index, entity?, word),
		Some(Context::ManagerChain { entity, manager, .. }) => manager_member(entity?, manager, word),
		Some(Context::RelatedFieldChain { entity, field, .. }) => {
			let target = entity.field(field)?.related_entity.as_deref()?;
			member(index.get_entity(target)?, word)
		}
		Some(Context::InstanceAccess { entity: Some(entity), .. }) => member(entity, word),
		Some(Context::InstanceAccess { entity: None, .. }) | None => {
			// A bare identifier: only model names are known outside of a chain.
			let dotted = preceding.trim_end_matches(is_ident_char).ends_with('.');
			if dotted {
				return None;
			}
			index.get_entity(word).map(Symbol::Entity)
		}
	}
}

/// Markdown describing `word`, the identifier right after `preceding`.
pub fn describe(index: &Index, preceding: &str, word: &str, unit: &str) -> Option<String> {
	let symbol = symbol_at(index, preceding, word, unit)?;
	Some(match symbol {
		Symbol::Entity(entity) => entity_docstring(entity),
		Symbol::Field(entity, field) => field_docstring(entity, field),
		Symbol::Method(entity, method) => {
			let doc = DEFAULT_METHODS
				.iter()
				.find(|default| method.location.is_none() && default.name == method.name);
			fomat! {
				"```python\n"
				if method.is_classmethod() { "@classmethod\n" }
				if method.is_staticmethod() { "@staticmethod\n" }
				if method.is_property() { "@property\n" }
				"def " (method.signature()) "\n```  \n"
				"*Defined on:* `" (entity.name) "`"
				if let Some(doc) = doc { "  \n" (doc.doc) }
			}
		}
		Symbol::Property(entity, property) => fomat! {
			"```python\n" (entity.name) "." (property) "\n```  \n"
			if data::DEFAULT_PROPERTIES.contains(&property) { "The primary key of the instance" } else { "Property" }
		},
		Symbol::Manager(entity, manager) => fomat! {
			"```python\n" (entity.name) "." (manager.name) ": "
			match manager.kind {
				ManagerKind::Default => { "Manager" }
				ManagerKind::Custom => { (manager.class.as_deref().unwrap_or("Manager")) }
				ManagerKind::SynthesizedReverse => { "RelatedManager" }
			}
			"\n```"
			if !manager.methods.is_empty() {
				"  \n*Methods:* "
				for method in &manager.methods { "`" (method) "`" } sep { ", " }
			}
		},
		Symbol::ManagerMethod(manager, method) => fomat! {
			"```python\n" (manager.class.as_deref().unwrap_or(&manager.name)) "." (method) "(…)\n```  \n"
			"Custom manager method"
		},
		Symbol::QuerySetOp(op) => fomat! {
			"```python\n" (op.name) (op.signature) "\n```  \n" (op.doc)
		},
		Symbol::Lookup(field, op) => fomat! {
			"`__" (op) "` lookup on `" (field.name) "` (" (field.declared_type) ")"
		},
		Symbol::FieldType(name, ty) => fomat! {
			"```python\nmodels." (name) "(…)\n```  \n" (ty.description)
		},
	})
}

fn entity_docstring(entity: &Entity) -> String {
	let declared = entity
		.fields
		.iter()
		.filter(|field| !field.is_reverse())
		.map(|field| &field.name);
	let reverse = entity.fields.iter().filter(|field| field.is_reverse()).map(|field| &field.name);
	let bases = entity.base_classes.iter().filter(|base| !data::FRAMEWORK_BASES.contains(base.as_str()));
	fomat! {
		"```python\nclass " (entity.name)
		if entity.is_abstract { "  # abstract" }
		"\n```  \n"
		if let Some(app) = &entity.app { "*App:* `" (app) "`  \n" }
		"*Defined in:* `" (entity.location) "`  \n"
		"*Fields:* " for name in declared { "`" (name) "`" } sep { ", " }
		if entity.fields.iter().any(Field::is_reverse) {
			"  \n*Reverse:* " for name in reverse { "`" (name) "`" } sep { ", " }
		}
		for base in bases { "  \n*Inherits:* `" (base) "`" }
	}
}

fn field_docstring(entity: &Entity, field: &Field) -> String {
	fomat! {
		"```python\n" (field.name) " = "
		if field.is_reverse() {
			"<reverse of " (field.related_entity.as_deref().unwrap_or("?")) ">"
		} else {
			"models." (field.declared_type) "("
			if let Some(related) = &field.related_entity { "\"" (related) "\", " }
			"…)"
		}
		"\n```  \n"
		"*Defined on:* `" (entity.name) "`"
		match &field.origin {
			Origin::Declared => {}
			Origin::Inherited { from } => { " (from `" (from) "`)" }
			Origin::Reverse { field: origin } => { " via `" (origin) "`" }
		}
		if !field.required && !field.is_reverse() { "  \n*Optional*" }
		if let Some(max_length) = field.max_length { "  \n*Max length:* " (max_length) }
		if let Some(default) = &field.default { "  \n*Default:* `" (default) "`" }
		if let Some(choices) = &field.choices {
			"  \n*Choices:* " for choice in choices { "`" (choice) "`" } sep { ", " }
		}
		if let Some(help) = &field.help_text { "  \n" (help) }
	}
}

/// Where `word`, the identifier right after `preceding`, is declared.
///
/// Reverse accessors lead to the relational field that induced them.
pub fn locate(index: &Index, preceding: &str, word: &str, unit: &str) -> Option<Location> {
	match symbol_at(index, preceding, word, unit)? {
		Symbol::Entity(entity) => Some(entity.location.clone()),
		Symbol::Field(_, field) | Symbol::Lookup(field, _) => field_location(index, field),
		Symbol::Method(_, method) => method.location.clone(),
		Symbol::Manager(..)
		| Symbol::ManagerMethod(..)
		| Symbol::Property(..)
		| Symbol::QuerySetOp(_)
		| Symbol::FieldType(..) => None,
	}
}

fn field_location(index: &Index, field: &Field) -> Option<Location> {
	let Origin::Reverse { field: origin } = &field.origin else {
		return field.location.clone();
	};
	let source = index.get_entity(field.related_entity.as_deref()?)?;
	source.field(origin)?.location.clone()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_utils::{LIBRARY_PATH, library_index};
	use pretty_assertions::assert_eq;

	const VIEWS: &str = "library/views.py";

	#[test]
	fn test_describe_entity() {
		let index = library_index();
		let text = index.describe("from library.models import ", "Book", VIEWS).expect("hover");
		assert!(text.starts_with("```python\nclass Book\n```"), "{text}");
		assert!(text.contains("*Defined in:* `library/models.py:"), "{text}");
		assert!(text.contains("`title`, `author`"), "{text}");
		let author = index.describe("x = ", "Author", VIEWS).expect("hover");
		assert!(author.contains("*Reverse:* `book_set`"), "{author}");
	}

	#[test]
	fn test_describe_members() {
		let index = library_index();
		let title = index.describe("Book.objects.filter(", "title", VIEWS).expect("hover");
		assert!(title.contains("title = models.CharField(…)"), "{title}");
		assert!(title.contains("*Max length:* 200"), "{title}");
		assert!(title.ends_with("Full title"), "{title}");

		let lookup = index.describe("Book.objects.filter(", "author__name__icontains", VIEWS);
		assert_eq!(lookup.as_deref(), Some("`__icontains` lookup on `name` (CharField)"));

		let reverse = index.describe("Author.objects.filter(", "book__title", VIEWS).expect("hover");
		assert!(reverse.contains("title = models.CharField(…)"), "{reverse}");
		assert_eq!(index.describe("Author.objects.filter(", "book_set__title", VIEWS), None);

		let op = index.describe("Book.objects.", "filter", VIEWS).expect("hover");
		assert!(op.starts_with("```python\nfilter(**kwargs) -> QuerySet"), "{op}");

		let summary = index.describe("x = Book.objects.first()\nx.", "summary", VIEWS).expect("hover");
		assert!(summary.contains("def summary(length=100)"), "{summary}");

		assert_eq!(index.describe("x = Book.objects.first()\nx.", "nothing", VIEWS), None);
		assert_eq!(index.describe("mystery.", "Book", VIEWS), None);
	}

	#[test]
	fn test_locate() {
		let index = library_index();
		let book = index.locate("x = ", "Book", VIEWS).expect("location");
		assert_eq!(book.unit, LIBRARY_PATH);
		assert_eq!(book.line, 24);

		let title = index.locate("x = Book.objects.first()\nx.", "title", VIEWS);
		assert_eq!(title.map(|loc| loc.line), Some(25));

		// The reverse accessor leads to `Book.author`.
		let reverse = index.locate("author = Author.objects.first()\nauthor.", "book_set", VIEWS);
		assert_eq!(reverse.map(|loc| loc.line), Some(26));

		let method = index.locate("x = Book.objects.first()\nx.", "is_long", VIEWS);
		assert_eq!(method.map(|loc| loc.line), Some(37));
		assert_eq!(index.locate("x = Book.objects.first()\nx.", "save", VIEWS), None);
	}
}
