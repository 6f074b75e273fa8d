//! Turns class bodies into [Entity] records.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use tracing::{debug, instrument, trace};

use super::{DefaultValue, Entity, Field, Location, Manager, ManagerKind, Method, MethodKind, Origin, inherit, relation};
use crate::data::{self, LIFECYCLE_METHODS, LookupFamily};
use crate::format_loc;
use crate::model::Relation;
use crate::scan::{
	Arg, CallAssignment, Declaration, LineIndex, MethodHeader, Scanner, inside_any, parse_arg, split_args,
	string_literal,
};
use crate::utils::{ByteRange, indent_of, is_blank, slice};

static ABSTRACT: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"(?m)(?:^|;)[ \t]*abstract[ \t]*=[ \t]*True\b").expect(format_loc!("invalid regex")));

/// Everything extracted from one source unit, built off-graph and swapped in whole.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitModels {
	pub path: String,
	pub entities: Vec<Entity>,
	pub relations: Vec<Relation>,
}

impl UnitModels {
	/// Extracts every entity of a unit. Pure: the graph is not involved.
	pub fn extract<S: Scanner>(scanner: &S, text: &str, path: &str) -> Self {
		Extractor::new(scanner, text, path).run()
	}

	pub fn entity_names(&self) -> Vec<String> {
		self.entities.iter().map(|entity| entity.name.clone()).collect()
	}
}

/// Members declared directly in one class body, nothing inherited.
#[derive(Debug, Default, Clone)]
pub struct Members {
	pub fields: Vec<Field>,
	pub methods: Vec<Method>,
	pub properties: Vec<String>,
	pub managers: Vec<Manager>,
}

pub struct Extractor<'a, S: Scanner> {
	scanner: &'a S,
	text: &'a str,
	unit: &'a str,
	lines: LineIndex,
	decls: Vec<Declaration>,
}

impl<'a, S: Scanner> Extractor<'a, S> {
	pub fn new(scanner: &'a S, text: &'a str, unit: &'a str) -> Self {
		Self {
			scanner,
			text,
			unit,
			lines: LineIndex::new(text),
			decls: scanner.declarations(text),
		}
	}

	/// First declaration named `name` in this unit.
	pub fn declaration(&self, name: &str) -> Option<&Declaration> {
		self.decls.iter().find(|decl| decl.name == name)
	}

	/// Declarations that are models: a base ending in `Model`, or a model declared earlier in the unit.
	pub fn entity_declarations(&self) -> Vec<&Declaration> {
		let mut models = HashSet::new();
		let mut out = vec![];
		for decl in &self.decls {
			let is_model = decl.bases.iter().any(|base| {
				let base = base.rsplit('.').next().unwrap_or(base);
				base.ends_with("Model") || models.contains(base)
			});
			if is_model {
				models.insert(decl.name.as_str());
				out.push(decl);
			}
		}
		out
	}

	#[instrument(level = "trace", skip_all, fields(unit = self.unit))]
	pub fn run(&self) -> UnitModels {
		let mut entities = IndexMap::new();
		for decl in self.entity_declarations() {
			let entity = self.entity(decl);
			// Python keeps the last definition of a name.
			entities.insert(entity.name.clone(), entity);
		}
		let entities = entities.into_values().collect::<Vec<_>>();
		let relations = entities.iter().flat_map(relation::relations_of).collect();
		UnitModels {
			path: self.unit.to_string(),
			entities,
			relations,
		}
	}

	/// A complete entity: own members, same-unit inherited members, framework defaults.
	pub fn entity(&self, decl: &Declaration) -> Entity {
		let members = self.members(decl, &decl.name);
		let mut entity = Entity {
			name: decl.name.clone(),
			source_unit: self.unit.to_string(),
			app: app_of(self.unit),
			location: self.location(decl.start.0),
			fields: members.fields,
			methods: members.methods,
			properties: members.properties,
			managers: members.managers,
			base_classes: decl.bases.clone(),
			is_abstract: self.is_abstract(decl),
		};
		inherit::merge_bases(self, &mut entity, decl);
		inherit::append_defaults(&mut entity);
		entity
	}

	/// Members declared in the body of `decl`. `owner` is the model `'self'` relations point to.
	pub fn members(&self, decl: &Declaration, owner: &str) -> Members {
		let mut members = Members::default();
		let Some(indent) = self.member_indent(decl) else {
			return members;
		};
		let headers = self.method_headers(decl.body.clone());
		let spans = headers.iter().map(|header| header.span.clone()).collect::<Vec<_>>();

		for call in self.scanner.call_assignments(self.text, decl.body.clone()) {
			let call = match call {
				Ok(call) => call,
				Err(err) => {
					debug!(class = %decl.name, "skipping fragment: {err}");
					continue;
				}
			};
			if call.indent != indent || inside_any(call.stmt.start, &spans) {
				trace!(class = %decl.name, target = %call.target, "not a class-level assignment");
				continue;
			}
			let args = split_args(slice(self.text, call.args.clone()))
				.into_iter()
				.map(parse_arg)
				.collect::<Vec<_>>();
			if let Some(declared_type) = field_type(&call.callee) {
				let mut field = self.field(&call, declared_type, &args, owner);
				if let Some(old) = members.managers.iter().position(|m| m.name == field.name) {
					members.managers.remove(old);
				}
				field.location = Some(self.location(call.stmt.start.0));
				upsert_field(&mut members.fields, field);
			} else if let Some(manager) = self.manager(&call, &args) {
				members.fields.retain(|field| field.name != manager.name);
				match members.managers.iter_mut().find(|m| m.name == manager.name) {
					Some(existing) => *existing = manager,
					None => members.managers.push(manager),
				}
			}
		}

		for header in headers.iter().filter(|header| header.indent == indent) {
			let Some(method) = self.method(header) else {
				continue;
			};
			if method.is_property() && !members.properties.contains(&method.name) {
				members.properties.push(method.name.clone());
			}
			match members.methods.iter_mut().find(|m| m.name == method.name) {
				Some(existing) => *existing = method,
				None => members.methods.push(method),
			}
		}

		members
	}

	fn method_headers(&self, body: ByteRange) -> Vec<MethodHeader> {
		self.scanner
			.methods(self.text, body)
			.into_iter()
			.filter_map(|header| {
				header
					.inspect_err(|err| debug!("skipping fragment: {err}"))
					.ok()
			})
			.collect()
	}

	/// Indentation of the first statement in the body, if the body spans lines.
	fn member_indent(&self, decl: &Declaration) -> Option<usize> {
		let mut lines = slice(self.text, decl.body.clone()).split('\n');
		// Rest of the header line.
		lines.next();
		lines.find(|line| !is_blank(line)).map(indent_of)
	}

	fn location(&self, offset: usize) -> Location {
		Location {
			unit: self.unit.to_string(),
			line: self.lines.line_of(offset.into()),
		}
	}

	fn field(&self, call: &CallAssignment, declared_type: &str, args: &[Arg<'_>], owner: &str) -> Field {
		let mut field = Field {
			name: call.target.clone(),
			declared_type: declared_type.to_string(),
			required: true,
			help_text: None,
			max_length: None,
			choices: None,
			default: None,
			related_entity: None,
			extra: IndexMap::new(),
			origin: Origin::Declared,
			location: None,
		};
		let text_like = data::lookup_family(declared_type) == LookupFamily::Text;
		let mut nullable = false;
		for arg in args {
			let Arg::Keyword(key, value) = *arg else {
				continue;
			};
			match key {
				"help_text" if string_literal(value).is_some() => {
					field.help_text = string_literal(value).map(str::to_string);
				}
				"max_length" if text_like && value.parse::<u32>().is_ok() => {
					field.max_length = value.parse().ok();
				}
				"choices" if literal_items(value).is_some() => {
					field.choices = literal_items(value);
				}
				"default" => field.default = Some(DefaultValue::parse(value)),
				"null" | "blank" => {
					nullable |= value == "True";
					field.extra.insert(key.to_string(), value.to_string());
				}
				_ => {
					field.extra.insert(key.to_string(), value.to_string());
				}
			}
		}
		field.required = !nullable;
		if field.is_relational() {
			field.related_entity = relation::resolve_target(args, owner);
			if field.related_entity.is_none() {
				debug!(owner, field = %field.name, "unresolved relation target");
			}
		}
		field
	}

	fn manager(&self, call: &CallAssignment, args: &[Arg<'_>]) -> Option<Manager> {
		let custom = |class: &str| Manager {
			name: call.target.clone(),
			kind: ManagerKind::Custom,
			class: Some(class.to_string()),
			methods: self.manager_methods(class),
		};
		if let Some(class) = call.callee.strip_suffix(".as_manager") {
			return Some(custom(class.rsplit('.').next().unwrap_or(class)));
		}
		if call.callee.ends_with(".from_queryset") {
			let queryset = args.iter().find_map(|arg| match arg {
				Arg::Positional(class) => Some(*class),
				_ => None,
			})?;
			return Some(custom(queryset.rsplit('.').next().unwrap_or(queryset)));
		}
		let class = call.callee.rsplit('.').next().unwrap_or(&call.callee);
		if !class.contains("Manager") {
			return None;
		}
		if class == "Manager" {
			return Some(Manager {
				name: call.target.clone(),
				kind: ManagerKind::Default,
				class: Some(class.to_string()),
				methods: vec![],
			});
		}
		Some(custom(class))
	}

	/// Public methods of a manager or queryset class declared in this unit, same-unit bases included.
	pub fn manager_methods(&self, class: &str) -> Vec<String> {
		let mut out = vec![];
		let mut seen = HashSet::new();
		self.collect_manager_methods(class, &mut out, &mut seen);
		out
	}

	fn collect_manager_methods<'s>(&'s self, class: &'s str, out: &mut Vec<String>, seen: &mut HashSet<&'s str>) {
		if !seen.insert(class) {
			return;
		}
		let Some(decl) = self.declaration(class) else {
			trace!(class, "manager class not declared in this unit");
			return;
		};
		let Some(indent) = self.member_indent(decl) else {
			return;
		};
		for header in self.method_headers(decl.body.clone()) {
			let dunder = header.name.starts_with("__") && header.name.ends_with("__");
			if header.indent != indent || dunder || header.name == "get_queryset" || header.name.starts_with('_') {
				continue;
			}
			if !out.contains(&header.name) {
				out.push(header.name);
			}
		}
		for base in &decl.bases {
			let base = base.rsplit('.').next().unwrap_or(base);
			if !matches!(base, "Manager" | "QuerySet" | "BaseManager") {
				self.collect_manager_methods(base, out, seen);
			}
		}
	}

	fn method(&self, header: &MethodHeader) -> Option<Method> {
		let name = &header.name;
		if (name.starts_with("__") && name.ends_with("__")) || LIFECYCLE_METHODS.contains(name.as_str()) {
			return None;
		}
		let mut kind = MethodKind::Instance;
		for decorator in &header.decorators {
			match decorator.rsplit('.').next() {
				Some("property" | "cached_property") => kind = MethodKind::Property,
				Some("classmethod") => kind = MethodKind::ClassMethod,
				Some("staticmethod") => kind = MethodKind::StaticMethod,
				// The property was already recorded through its getter.
				Some("setter" | "deleter") => return None,
				_ => {}
			}
		}
		let mut params = header.params.clone();
		if kind != MethodKind::StaticMethod && params.first().is_some_and(|param| !param.starts_with('*')) {
			params.remove(0);
		}
		Some(Method {
			name: name.clone(),
			kind,
			params,
			location: Some(self.location(header.start.0)),
		})
	}

	fn is_abstract(&self, decl: &Declaration) -> bool {
		let body = decl.body.clone();
		self.decls
			.iter()
			.filter(|meta| meta.name == "Meta" && meta.indent > decl.indent)
			.filter(|meta| body.start <= meta.start && meta.start < body.end)
			.any(|meta| ABSTRACT.is_match(slice(self.text, meta.body.clone())))
	}
}

fn upsert_field(fields: &mut Vec<Field>, field: Field) {
	match fields.iter_mut().find(|existing| existing.name == field.name) {
		Some(existing) => *existing = field,
		None => fields.push(field),
	}
}

/// The declared type if `callee` constructs a model field.
fn field_type(callee: &str) -> Option<&str> {
	match callee.rsplit_once('.') {
		Some((module, ty)) => {
			let from_models = module == "models" || module.ends_with(".models");
			let is_type = ty.starts_with(char::is_uppercase) && !ty.contains("Manager") && !ty.contains("QuerySet");
			(from_models && is_type).then_some(ty)
		}
		None => (callee.ends_with("Field") || data::is_relational(callee)).then_some(callee),
	}
}

/// Items of a literal list or tuple, as source text.
fn literal_items(expr: &str) -> Option<Vec<String>> {
	let expr = expr.trim();
	let inner = expr
		.strip_prefix('[')
		.and_then(|rest| rest.strip_suffix(']'))
		.or_else(|| expr.strip_prefix('(').and_then(|rest| rest.strip_suffix(')')))?;
	Some(split_args(inner).into_iter().map(str::to_string).collect())
}

/// `shop/models.py` and `shop/models/product.py` both belong to `shop`.
fn app_of(unit: &str) -> Option<String> {
	let parent = Path::new(unit).parent()?;
	let dir = parent.file_name()?.to_str()?;
	if dir == "models" {
		return parent.parent()?.file_name()?.to_str().map(str::to_string);
	}
	Some(dir.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::scan::RegexScanner;
	use pretty_assertions::assert_eq;

	const SHOP: &str = r#"from django.db import models


class Category(models.Model):
    name = models.CharField(max_length=100, help_text="Display name")
    parent = models.ForeignKey('self', null=True, blank=True, related_name='children', on_delete=models.CASCADE)


class ProductManager(models.Manager):
    def get_queryset(self):
        return super().get_queryset()

    def available(self):
        return self.filter(is_available=True)

    def featured(self):
        return self.filter(is_featured=True)


class Product(models.Model):
    STATUS = [('draft', 'Draft'), ('live', 'Live')]

    name = models.CharField(max_length=200)
    status = models.CharField(max_length=10, choices=[('draft', 'Draft'), ('live', 'Live')], default='draft')
    price = models.DecimalField(max_digits=10, decimal_places=2)
    stock = models.IntegerField(default=0)
    category = models.ForeignKey(Category, on_delete=models.CASCADE, related_name='products')
    is_available = models.BooleanField(default=True)

    objects = ProductManager()
    live = models.Manager()

    def __str__(self):
        return self.name

    @property
    def sale_price(self):
        discount = models.DecimalField()
        return self.price

    def is_in_stock(self):
        return self.stock > 0

    def restock(self, amount, *, notify=False):
        self.stock += amount

    def save(self, *args, **kwargs):
        super().save(*args, **kwargs)
"#;

	fn extract(text: &str) -> UnitModels {
		crate::utils::init_for_test();
		Extractor::new(&RegexScanner, text, "shop/models.py").run()
	}

	#[test]
	fn test_entities_detected() {
		let unit = extract(SHOP);
		let names = unit.entities.iter().map(|e| e.name.as_str()).collect::<Vec<_>>();
		assert_eq!(names, ["Category", "Product"]);
		assert_eq!(unit.entities[0].app.as_deref(), Some("shop"));
		assert_eq!(unit.entities[0].location.line, 3);
	}

	#[test]
	fn test_field_attributes() {
		let unit = extract(SHOP);
		let category = &unit.entities[0];
		let name = category.field("name").expect("name");
		assert_eq!(name.declared_type, "CharField");
		assert_eq!(name.max_length, Some(100));
		assert_eq!(name.help_text.as_deref(), Some("Display name"));
		assert!(name.required);
		assert_eq!(name.location.as_ref().map(|loc| loc.line), Some(4));

		let parent = category.field("parent").expect("parent");
		assert!(!parent.required);
		assert_eq!(parent.related_entity.as_deref(), Some("Category"));
		assert_eq!(parent.extra.get("related_name").map(String::as_str), Some("'children'"));

		let product = &unit.entities[1];
		let status = product.field("status").expect("status");
		assert_eq!(
			status.choices.as_deref(),
			Some(&["('draft', 'Draft')".to_string(), "('live', 'Live')".to_string()][..])
		);
		assert_eq!(status.default, Some(DefaultValue::Str("draft".to_string())));
		let price = product.field("price").expect("price");
		assert_eq!(price.max_length, None);
		assert_eq!(price.extra.get("max_digits").map(String::as_str), Some("10"));
	}

	#[test]
	fn test_fields_inside_methods_skipped() {
		let unit = extract(SHOP);
		let product = &unit.entities[1];
		assert!(product.field("discount").is_none());
		let names = product.fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
		assert_eq!(names, ["name", "status", "price", "stock", "category", "is_available"]);
	}

	#[test]
	fn test_methods_and_properties() {
		let unit = extract(SHOP);
		let product = &unit.entities[1];
		let own = product
			.methods
			.iter()
			.filter(|m| m.location.is_some())
			.map(|m| (m.name.as_str(), m.kind, m.params.clone()))
			.collect::<Vec<_>>();
		assert_eq!(
			own,
			[
				("sale_price", MethodKind::Property, vec![]),
				("is_in_stock", MethodKind::Instance, vec![]),
				(
					"restock",
					MethodKind::Instance,
					vec!["amount".to_string(), "*".to_string(), "notify=False".to_string()]
				),
			]
		);
		assert!(product.properties.contains(&"sale_price".to_string()));
		// Supplied by the defaults rather than the override.
		let save = product.method("save").expect("save");
		assert_eq!(save.location, None);
		assert_eq!(save.params.len(), 4);
	}

	#[test]
	fn test_managers() {
		let unit = extract(SHOP);
		let product = &unit.entities[1];
		let objects = product.manager("objects").expect("objects");
		assert_eq!(objects.kind, ManagerKind::Custom);
		assert_eq!(objects.methods, ["available", "featured"]);
		assert_eq!(product.manager("live").map(|m| m.kind), Some(ManagerKind::Default));

		let category = &unit.entities[0];
		assert_eq!(category.managers, [Manager::default_manager()]);
	}

	#[test]
	fn test_queryset_as_manager() {
		let text = r#"
class BookQuerySet(models.QuerySet):
    def published(self):
        return self.filter(published=True)

    def _internal(self):
        pass

class Book(models.Model):
    objects = BookQuerySet.as_manager()
    drafts = models.Manager.from_queryset(BookQuerySet)()
"#;
		let unit = extract(text);
		let book = &unit.entities[0];
		assert_eq!(book.manager("objects").map(|m| m.methods.clone()), Some(vec!["published".to_string()]));
		assert_eq!(book.manager("drafts").map(|m| m.kind), Some(ManagerKind::Custom));
	}

	#[test]
	fn test_abstract_and_relations() {
		let text = r#"
class Stamped(models.Model):
    created = models.DateTimeField(auto_now_add=True)

    class Meta:
        abstract = True

class Author(Stamped):
    name = models.CharField(max_length=50)

class Book(Stamped):
    author = models.ForeignKey("library.Author", on_delete=models.CASCADE)
    owner = models.ForeignKey(settings.AUTH_USER_MODEL, on_delete=models.CASCADE)
"#;
		let unit = extract(text);
		let flags = unit
			.entities
			.iter()
			.map(|e| (e.name.as_str(), e.is_abstract))
			.collect::<Vec<_>>();
		assert_eq!(flags, [("Stamped", true), ("Author", false), ("Book", false)]);
		let relations = unit
			.relations
			.iter()
			.map(|r| (r.from_entity.as_str(), r.field_name.as_str(), r.to_entity.name()))
			.collect::<Vec<_>>();
		assert_eq!(relations, [("Book", "author", Some("Author")), ("Book", "owner", None)]);
	}

	#[test]
	fn test_extraction_is_repeatable() {
		assert_eq!(extract(SHOP), extract(SHOP));
	}
}
