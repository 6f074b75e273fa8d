//! Models, their members and the relations between them.

use std::fmt::Display;

use indexmap::IndexMap;
use serde::Serialize;

use crate::data::{self, REVERSE_COLLECTION};
use crate::scan::string_literal;

pub mod extract;
pub mod inherit;
pub mod relation;
pub mod reverse;

pub use extract::{Extractor, UnitModels};
pub use relation::{Relation, RelationKind, Target};

/// A point in a source unit, lines 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Location {
	pub unit: String,
	pub line: u32,
}

impl Display for Location {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}:{}", self.unit, self.line + 1)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
	pub name: String,
	pub source_unit: String,
	/// The application (package) that declares the model, if the path says so.
	pub app: Option<String>,
	pub location: Location,
	pub fields: Vec<Field>,
	pub methods: Vec<Method>,
	pub properties: Vec<String>,
	pub managers: Vec<Manager>,
	/// Raw base expressions as written, framework markers included.
	pub base_classes: Vec<String>,
	pub is_abstract: bool,
}

impl Entity {
	pub fn field(&self, name: &str) -> Option<&Field> {
		self.fields.iter().find(|field| field.name == name)
	}

	pub fn method(&self, name: &str) -> Option<&Method> {
		self.methods.iter().find(|method| method.name == name)
	}

	pub fn manager(&self, name: &str) -> Option<&Manager> {
		self.managers.iter().find(|manager| manager.name == name)
	}

	/// Inserts a field, replacing an earlier one of the same name in place.
	pub(crate) fn upsert_field(&mut self, field: Field) {
		match self.fields.iter_mut().find(|existing| existing.name == field.name) {
			Some(existing) => *existing = field,
			None => self.fields.push(field),
		}
	}

	/// Appends the field unless one of the same name is present. Returns whether it was added.
	pub(crate) fn merge_field(&mut self, field: Field) -> bool {
		if self.field(&field.name).is_some() {
			return false;
		}
		self.fields.push(field);
		true
	}

	pub(crate) fn merge_method(&mut self, method: Method) -> bool {
		if self.method(&method.name).is_some() {
			return false;
		}
		self.methods.push(method);
		true
	}

	pub(crate) fn merge_property(&mut self, property: &str) -> bool {
		if self.properties.iter().any(|existing| existing == property) {
			return false;
		}
		self.properties.push(property.to_string());
		true
	}

	pub(crate) fn merge_manager(&mut self, manager: Manager) -> bool {
		if self.manager(&manager.name).is_some() {
			return false;
		}
		self.managers.push(manager);
		true
	}
}

/// Where a field on an entity came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Origin {
	Declared,
	Inherited { from: String },
	/// Installed by reverse synthesis for the relational field `field` on `related_entity`.
	Reverse { field: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DefaultValue {
	Bool(bool),
	Int(i64),
	Float(f64),
	Str(String),
	/// Anything that is not a literal, kept as source text.
	Expr(String),
}

impl DefaultValue {
	pub fn parse(expr: &str) -> Self {
		let expr = expr.trim();
		match expr {
			"True" => return DefaultValue::Bool(true),
			"False" => return DefaultValue::Bool(false),
			_ => {}
		}
		if let Ok(int) = expr.parse::<i64>() {
			return DefaultValue::Int(int);
		}
		if expr.contains('.') && expr.chars().all(|ch| ch.is_ascii_digit() || ch == '.' || ch == '-') {
			if let Ok(float) = expr.parse::<f64>() {
				return DefaultValue::Float(float);
			}
		}
		match crate::scan::string_literal(expr) {
			Some(literal) => DefaultValue::Str(literal.to_string()),
			None => DefaultValue::Expr(expr.to_string()),
		}
	}
}

impl Display for DefaultValue {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			DefaultValue::Bool(true) => f.write_str("True"),
			DefaultValue::Bool(false) => f.write_str("False"),
			DefaultValue::Int(int) => write!(f, "{int}"),
			DefaultValue::Float(float) => write!(f, "{float}"),
			DefaultValue::Str(string) => write!(f, "{string:?}"),
			DefaultValue::Expr(expr) => f.write_str(expr),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
	pub name: String,
	/// The constructor name, e.g. `CharField`. Free-form: unknown types are still fields.
	pub declared_type: String,
	pub required: bool,
	pub help_text: Option<String>,
	pub max_length: Option<u32>,
	pub choices: Option<Vec<String>>,
	pub default: Option<DefaultValue>,
	/// Target model of a relational or reverse field. `None` on a relational field means unresolved.
	pub related_entity: Option<String>,
	/// Keyword arguments without a dedicated slot, values as source text.
	pub extra: IndexMap<String, String>,
	pub origin: Origin,
	pub location: Option<Location>,
}

impl Field {
	#[inline]
	pub fn is_relational(&self) -> bool {
		data::is_relational(&self.declared_type)
	}

	#[inline]
	pub fn is_reverse(&self) -> bool {
		matches!(self.origin, Origin::Reverse { .. })
	}

	/// The keyword `filter()` reaches this field with. Reverse relations go by the
	/// source field's `related_query_name`, then its `related_name`, then the
	/// lowercased source model; the `_set` accessor is not a valid lookup.
	pub fn query_name(&self, source: Option<&Entity>) -> String {
		let Origin::Reverse { field: origin } = &self.origin else {
			return self.name.clone();
		};
		let declared = source.and_then(|entity| entity.field(origin));
		let keyword = |key: &str| {
			declared
				.and_then(|field| field.extra.get(key))
				.and_then(|value| string_literal(value))
				.map(str::to_string)
		};
		keyword("related_query_name")
			.or_else(|| keyword("related_name"))
			.unwrap_or_else(|| self.related_entity.as_deref().unwrap_or(&self.name).to_lowercase())
	}

	/// The synthetic field a reverse relation installs on its target.
	pub fn reverse(name: String, from_entity: &str, from_field: &str) -> Self {
		Field {
			name,
			declared_type: REVERSE_COLLECTION.to_string(),
			required: false,
			help_text: None,
			max_length: None,
			choices: None,
			default: None,
			related_entity: Some(from_entity.to_string()),
			extra: IndexMap::new(),
			origin: Origin::Reverse {
				field: from_field.to_string(),
			},
			location: None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MethodKind {
	Instance,
	Property,
	ClassMethod,
	StaticMethod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Method {
	pub name: String,
	pub kind: MethodKind,
	/// Parameters as written, receiver dropped.
	pub params: Vec<String>,
	pub location: Option<Location>,
}

impl Method {
	#[inline]
	pub fn is_property(&self) -> bool {
		self.kind == MethodKind::Property
	}
	#[inline]
	pub fn is_classmethod(&self) -> bool {
		self.kind == MethodKind::ClassMethod
	}
	#[inline]
	pub fn is_staticmethod(&self) -> bool {
		self.kind == MethodKind::StaticMethod
	}
	/// `name(a, b=1)` as shown to the user.
	pub fn signature(&self) -> String {
		format!("{}({})", self.name, self.params.join(", "))
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ManagerKind {
	/// The stock manager; its surface is implied.
	Default,
	Custom,
	SynthesizedReverse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manager {
	pub name: String,
	pub kind: ManagerKind,
	/// The manager or queryset class, for declared managers.
	pub class: Option<String>,
	/// Custom method names; empty for kinds whose surface is implied.
	pub methods: Vec<String>,
}

impl Manager {
	pub fn default_manager() -> Self {
		Manager {
			name: data::DEFAULT_MANAGER.to_string(),
			kind: ManagerKind::Default,
			class: None,
			methods: vec![],
		}
	}
}
