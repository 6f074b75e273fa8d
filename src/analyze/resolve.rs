//! Binds identifiers in the text before the cursor to entities.
//!
//! There is no symbol table: the resolver walks preceding lines backwards,
//! never further than the configured look-back, and the nearest binding of a
//! name decides its type.

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

use super::{Segment, parse_chain};
use crate::data::{COLLECTION_PREFIXES, COLLECTION_SUFFIXES, DEFAULT_MANAGER, Returns, queryset_op};
use crate::format_loc;
use crate::index::Index;
use crate::model::{Entity, RelationKind};
use crate::scan::{Arg, parse_arg, split_args, string_literal};
use crate::utils::{indent_of, is_capitalized, tail_lines};

static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^[ \t]*([A-Za-z_]\w*)[ \t]*(?::[ \t]*([^=]+?)[ \t]*)?=[ \t]*([^=].*)$").expect(format_loc!("invalid regex"))
});

static TUPLE_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^[ \t]*\(?[ \t]*([A-Za-z_]\w*)[ \t]*,[ \t]*\w+[ \t]*\)?[ \t]*=[ \t]*([^=].*)$")
		.expect(format_loc!("invalid regex"))
});

static FOR_LOOP: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^[ \t]*(?:async[ \t]+)?for[ \t]+([A-Za-z_]\w*)[ \t]+in[ \t]+(.+?)[ \t]*:[ \t]*$")
		.expect(format_loc!("invalid regex"))
});

static BARE_ANNOTATION: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^[ \t]*([A-Za-z_]\w*)[ \t]*:[ \t]*([\w.'\x22]+)[ \t]*$").expect(format_loc!("invalid regex"))
});

static PARAMETER: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"[(,][ \t]*([A-Za-z_]\w*)[ \t]*:[ \t]*([\w.'\x22]+)").expect(format_loc!("invalid regex"))
});

static DEF: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^[ \t]*(?:async[ \t]+)?def[ \t]+\w+[ \t]*\(").expect(format_loc!("invalid regex")));

static CLASS: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^([ \t]*)class[ \t]+(\w+)").expect(format_loc!("invalid regex")));

/// The subset of values that may resolve to an entity.
#[derive(Debug, Clone, Copy)]
pub enum Type<'a> {
	/// The model class itself.
	Class(&'a Entity),
	/// A manager or a queryset over the model.
	QuerySet(&'a Entity),
	Instance(&'a Entity),
}

impl<'a> Type<'a> {
	#[inline]
	pub fn entity(self) -> &'a Entity {
		match self {
			Type::Class(entity) | Type::QuerySet(entity) | Type::Instance(entity) => entity,
		}
	}
}

/// Whether a method name conventionally hands back many records.
pub fn is_collection_method(name: &str) -> bool {
	COLLECTION_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
		|| COLLECTION_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
		|| queryset_op(name).is_some_and(|op| op.returns == Returns::QuerySet)
}

pub struct Resolver<'a> {
	index: &'a Index,
	unit: &'a str,
	/// Lines before the cursor line, oldest first.
	lines: Vec<&'a str>,
	/// Indentation of the cursor line.
	indent: usize,
}

impl<'a> Resolver<'a> {
	pub fn new(index: &'a Index, preceding: &'a str, unit: &'a str) -> Self {
		let mut lines = tail_lines(preceding, index.settings().look_back + 1);
		let current = lines.pop().unwrap_or_default();
		Self {
			index,
			unit,
			lines,
			indent: indent_of(current),
		}
	}

	#[inline]
	pub fn index(&self) -> &'a Index {
		self.index
	}

	/// The type bound to `name` at the cursor.
	pub fn type_of(&self, name: &str) -> Option<Type<'a>> {
		self.binding_at(name, self.lines.len())
	}

	pub fn resolve_instance(&self, name: &str) -> Option<&'a Entity> {
		match self.type_of(name)? {
			Type::Instance(entity) => Some(entity),
			_ => None,
		}
	}

	/// The model of a manager or queryset bound to `name`, for `name.filter(` receivers.
	pub fn resolve_queryset(&self, name: &str) -> Option<&'a Entity> {
		match self.type_of(name)? {
			Type::QuerySet(entity) => Some(entity),
			_ => None,
		}
	}

	/// The type of a dotted chain evaluated at the cursor.
	pub fn evaluate(&self, chain: &[Segment<'_>]) -> Option<Type<'a>> {
		self.evaluate_at(chain, self.lines.len())
	}

	fn evaluate_at(&self, chain: &[Segment<'_>], end: usize) -> Option<Type<'a>> {
		let (root, rest) = chain.split_first()?;
		let mut ty = self.root_type(root, end)?;
		for segment in rest {
			ty = self.step(ty, segment)?;
		}
		Some(ty)
	}

	fn root_type(&self, root: &Segment<'_>, end: usize) -> Option<Type<'a>> {
		let ty = match root.call {
			None => self.binding_at(root.name, end)?,
			Some(args) if root.name == "get_object_or_404" => {
				let model = split_args(args).into_iter().map(parse_arg).find_map(|arg| match arg {
					Arg::Positional(model) => Some(model),
					Arg::Keyword(..) => None,
				})?;
				Type::Instance(self.entity_named(model)?)
			}
			Some(_) if is_capitalized(root.name) => Type::Instance(self.entity_named(root.name)?),
			Some(_) => return None,
		};
		subscript(ty, root)
	}

	fn step(&self, ty: Type<'a>, segment: &Segment<'_>) -> Option<Type<'a>> {
		let next = match (ty, segment.call) {
			(Type::Class(entity), None) => {
				if segment.name != DEFAULT_MANAGER && entity.manager(segment.name).is_none() {
					return None;
				}
				Type::QuerySet(entity)
			}
			(Type::Class(entity), Some(_)) if is_collection_method(segment.name) => Type::QuerySet(entity),
			// Factory classmethods such as `Book.from_isbn(...)`.
			(Type::Class(entity), Some(_)) => Type::Instance(entity),
			(Type::QuerySet(entity), Some(_)) => match queryset_op(segment.name).map(|op| op.returns) {
				Some(Returns::QuerySet) => Type::QuerySet(entity),
				Some(Returns::Instance) => Type::Instance(entity),
				Some(Returns::Scalar) => return None,
				// Custom manager methods are assumed to chain.
				None => Type::QuerySet(entity),
			},
			(Type::QuerySet(_), None) => return None,
			(Type::Instance(entity), None) => {
				let field = entity.field(segment.name)?;
				let target = self.index.get_entity(field.related_entity.as_deref()?)?;
				match RelationKind::of(&field.declared_type) {
					Some(RelationKind::ToOne | RelationKind::ToOneUnique) => Type::Instance(target),
					Some(RelationKind::ToMany) => Type::QuerySet(target),
					None if field.is_reverse() => Type::QuerySet(target),
					None => return None,
				}
			}
			(Type::Instance(_), Some(_)) => return None,
		};
		subscript(next, segment)
	}

	fn entity_named(&self, expr: &str) -> Option<&'a Entity> {
		let expr = string_literal(expr).unwrap_or(expr).trim();
		let name = expr.rsplit('.').next().unwrap_or(expr);
		self.index.get_entity(name).or_else(|| self.index.find_entity(name, self.unit))
	}

	/// The nearest binding of `name` in `lines[..end]`, else a match on the name alone.
	fn binding_at(&self, name: &str, end: usize) -> Option<Type<'a>> {
		if matches!(name, "self" | "cls") {
			let entity = self.enclosing_entity(end)?;
			return Some(if name == "self" {
				Type::Instance(entity)
			} else {
				Type::Class(entity)
			});
		}
		for (line_no, line) in self.lines[..end].iter().enumerate().rev() {
			let line = strip_comment(line);
			if let Some(caps) = ASSIGNMENT.captures(line) {
				if &caps[1] == name {
					if let Some(annotation) = caps.get(2) {
						if let Some(entity) = self.annotated(annotation.as_str()) {
							return Some(Type::Instance(entity));
						}
					}
					let rhs = caps.get(3).map(|rhs| rhs.as_str()).unwrap_or_default();
					let ty = parse_chain(rhs).and_then(|chain| self.evaluate_at(&chain, line_no));
					trace!(name, rhs, resolved = ty.is_some(), "nearest assignment");
					return ty;
				}
				continue;
			}
			if let Some(caps) = TUPLE_ASSIGNMENT.captures(line) {
				if &caps[1] == name {
					let rhs = caps.get(2).map(|rhs| rhs.as_str()).unwrap_or_default();
					let chain = parse_chain(rhs)?;
					let (last, receiver) = chain.split_last()?;
					if !matches!(last.name, "get_or_create" | "update_or_create") {
						return None;
					}
					return match self.evaluate_at(receiver, line_no)? {
						Type::QuerySet(entity) => Some(Type::Instance(entity)),
						_ => None,
					};
				}
				continue;
			}
			if let Some(caps) = FOR_LOOP.captures(line) {
				if &caps[1] == name {
					let iterable = caps.get(2).map(|it| it.as_str()).unwrap_or_default();
					return match parse_chain(iterable).and_then(|chain| self.evaluate_at(&chain, line_no))? {
						Type::QuerySet(entity) => Some(Type::Instance(entity)),
						_ => None,
					};
				}
				continue;
			}
			if let Some(caps) = BARE_ANNOTATION.captures(line) {
				if &caps[1] == name {
					return self.annotated(&caps[2]).map(Type::Instance);
				}
				continue;
			}
			if DEF.is_match(line) {
				let annotated = PARAMETER
					.captures_iter(line)
					.find(|caps| &caps[1] == name)
					.and_then(|caps| self.annotated(&caps[2]));
				if let Some(entity) = annotated {
					return Some(Type::Instance(entity));
				}
			}
		}
		let entity = self.index.find_entity(name, self.unit)?;
		trace!(name, entity = %entity.name, "bound by name");
		Some(if is_capitalized(name) {
			Type::Class(entity)
		} else {
			Type::Instance(entity)
		})
	}

	fn annotated(&self, annotation: &str) -> Option<&'a Entity> {
		let annotation = annotation.trim().trim_matches(['\'', '"']);
		let name = annotation.rsplit('.').next().unwrap_or(annotation);
		self.index.get_entity(name)
	}

	/// The entity declared by the nearest class header left of the cursor line.
	fn enclosing_entity(&self, end: usize) -> Option<&'a Entity> {
		let mut indent = self.indent;
		for line in self.lines[..end].iter().rev() {
			if line.trim().is_empty() {
				continue;
			}
			if let Some(caps) = CLASS.captures(line) {
				let class_indent = caps[1].len();
				if class_indent < indent {
					return self.index.get_entity(&caps[2]);
				}
			}
			indent = indent.min(indent_of(line));
		}
		None
	}
}

fn subscript<'a>(ty: Type<'a>, segment: &Segment<'_>) -> Option<Type<'a>> {
	match (ty, segment.subscript) {
		(ty, None) => Some(ty),
		(Type::QuerySet(entity), Some(index)) if index.contains(':') => Some(Type::QuerySet(entity)),
		(Type::QuerySet(entity), Some(_)) => Some(Type::Instance(entity)),
		_ => None,
	}
}

/// Drops a trailing `# comment` outside of string literals.
fn strip_comment(line: &str) -> &str {
	let mut quote = None;
	for (idx, ch) in line.char_indices() {
		match (quote, ch) {
			(Some(delim), ch) if ch == delim => quote = None,
			(Some(_), _) => {}
			(None, '\'' | '"') => quote = Some(ch),
			(None, '#') => return line[..idx].trim_end(),
			_ => {}
		}
	}
	line.trim_end()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_utils::{LIBRARY_PATH, library_index};
	use pretty_assertions::assert_eq;

	fn instance(index: &Index, preceding: &str, name: &str) -> Option<String> {
		let resolver = Resolver::new(index, preceding, "library/views.py");
		resolver.resolve_instance(name).map(|entity| entity.name.clone())
	}

	#[test]
	fn test_instance_heuristics() {
		let index = library_index();
		let cases = [
			("book = Book.objects.get(pk=1)\n", "book", Some("Book")),
			("book = Book.catalog.published().first()\n", "book", Some("Book")),
			("author = Author(name='x')\n", "author", Some("Author")),
			("for tag in Tag.objects.all():\n", "tag", Some("Tag")),
			("for tag in Tag.objects:\n", "tag", Some("Tag")),
			("b = Book.from_isbn('123')\n", "b", Some("Book")),
			("b = Book.filter_by_title('x')\n", "b", None),
			("b = Book.objects.filter(pages=1)\n", "b", None),
			("b = Book.objects.count()\n", "b", None),
			("writer = Book.objects.get(pk=1).author\n", "writer", Some("Author")),
			("obj, created = Tag.objects.get_or_create(label='x')\n", "obj", Some("Tag")),
			("def view(request, item: Book):\n", "item", Some("Book")),
			("b = get_object_or_404(Book, pk=1)\n", "b", Some("Book")),
			("first = Book.objects.all()[0]\n", "first", Some("Book")),
		];
		for (preceding, name, expected) in cases {
			assert_eq!(instance(&index, preceding, name).as_deref(), expected, "{preceding}");
		}
	}

	#[test]
	fn test_nearest_assignment_wins() {
		let index = library_index();
		let preceding = "x = Author.objects.get(pk=1)\nx = 42\n";
		assert_eq!(instance(&index, preceding, "x"), None);
		let preceding = "x = 42\nx = Author.objects.get(pk=1)  # the author\n";
		assert_eq!(instance(&index, preceding, "x").as_deref(), Some("Author"));
	}

	#[test]
	fn test_name_fallback() {
		let index = library_index();
		assert_eq!(instance(&index, "", "book").as_deref(), Some("Book"));
		assert_eq!(instance(&index, "", "unknown"), None);
		let resolver = Resolver::new(&index, "", LIBRARY_PATH);
		assert!(matches!(resolver.type_of("Book"), Some(Type::Class(entity)) if entity.name == "Book"));
	}

	#[test]
	fn test_look_back_is_bounded() {
		let mut index = library_index();
		let mut settings = index.settings().clone();
		settings.look_back = 2;
		index.configure(settings);
		let preceding = "found = Book.objects.get(pk=1)\n\n\n\n";
		assert_eq!(instance(&index, preceding, "found"), None);
	}

	#[test]
	fn test_self_binds_enclosing_class() {
		let index = library_index();
		let preceding = "class Book(models.Model):\n    def summary(self):\n        self.";
		let resolver = Resolver::new(&index, preceding, LIBRARY_PATH);
		assert_eq!(resolver.resolve_instance("self").map(|e| e.name.as_str()), Some("Book"));
	}

	#[test]
	fn test_queryset_bindings() {
		let index = library_index();
		let preceding = "qs = Book.objects.filter(pages__gt=100).exclude(title='')\nposts = author.book_set\n";
		let resolver = Resolver::new(&index, preceding, "library/views.py");
		assert_eq!(resolver.resolve_queryset("qs").map(|e| e.name.as_str()), Some("Book"));
		assert_eq!(resolver.resolve_queryset("posts").map(|e| e.name.as_str()), Some("Book"));
		assert_eq!(resolver.resolve_queryset("book"), None);
	}
}
