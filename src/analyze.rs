//! Classifies the text before the cursor. The two most important items are
//! [`classify`] and the [`Resolver`] it consults.

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

use crate::data::{DEFAULT_MANAGER, FILTER_CALLS, MANAGER_SUFFIXES};
use crate::format_loc;
use crate::index::Index;
use crate::model::{Entity, Field};
use crate::scan::closing_paren;

mod resolve;

pub use resolve::{Resolver, Type, is_collection_method};

static MODELS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^[ \t]*from[ \t]+([\w.]*models)[ \t]+import[ \t]+(?:\(?[\w \t,]*,)?[ \t(]*$")
		.expect(format_loc!("invalid regex"))
});

static RELATION_TARGET: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"\b(?:ForeignKey|OneToOneField|ManyToManyField)\([ \t]*(?:to[ \t]*=[ \t]*)?['\x22]?$")
		.expect(format_loc!("invalid regex"))
});

static FIELD_TYPE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"(?:^|[^\w.])models\.$").expect(format_loc!("invalid regex")));

/// What the cursor is completing. Entities are resolved at classification time.
#[derive(Debug, Clone, Copy)]
pub enum Context<'a> {
	/// After `from app.models import`, or the target argument of a relational field.
	EntityName { prefix: &'a str },
	/// A field constructor after `models.`.
	FieldType { prefix: &'a str },
	/// A keyword position in `receiver.filter(`; `entity` is the receiver's model.
	FilterKwargs { entity: Option<&'a Entity>, prefix: &'a str },
	/// `root.manager.`, or `manager: None` after a chain of queryset calls.
	ManagerChain {
		entity: Option<&'a Entity>,
		manager: Option<&'a str>,
		prefix: &'a str,
	},
	/// `root.field.` where `field` is relational on `entity`.
	RelatedFieldChain {
		entity: &'a Entity,
		field: &'a str,
		prefix: &'a str,
	},
	InstanceAccess { entity: Option<&'a Entity>, prefix: &'a str },
}

impl<'a> Context<'a> {
	pub fn kind(&self) -> &'static str {
		match self {
			Context::EntityName { .. } => "entity-name",
			Context::FieldType { .. } => "field-type",
			Context::FilterKwargs { .. } => "filter-kwargs",
			Context::ManagerChain { .. } => "manager-chain",
			Context::RelatedFieldChain { .. } => "related-field-chain",
			Context::InstanceAccess { .. } => "instance-access",
		}
	}

	/// The partial identifier being typed.
	pub fn prefix(&self) -> &'a str {
		match *self {
			Context::EntityName { prefix }
			| Context::FieldType { prefix }
			| Context::FilterKwargs { prefix, .. }
			| Context::ManagerChain { prefix, .. }
			| Context::RelatedFieldChain { prefix, .. }
			| Context::InstanceAccess { prefix, .. } => prefix,
		}
	}

	/// The entity whose members the context is about, if resolved.
	pub fn entity(&self) -> Option<&'a Entity> {
		match *self {
			Context::EntityName { .. } | Context::FieldType { .. } => None,
			Context::FilterKwargs { entity, .. }
			| Context::ManagerChain { entity, .. }
			| Context::InstanceAccess { entity, .. } => entity,
			Context::RelatedFieldChain { entity, .. } => Some(entity),
		}
	}
}

/// One link of a dotted chain: `name`, then optionally `(call)` and/or `[subscript]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
	pub name: &'a str,
	/// Argument text, if the segment is called.
	pub call: Option<&'a str>,
	pub subscript: Option<&'a str>,
}

#[inline]
pub fn is_ident_char(ch: char) -> bool {
	ch.is_alphanumeric() || ch == '_'
}

/// Parses `a.b(x).c[0]` into segments. The whole of `expr` must be a chain.
pub fn parse_chain(expr: &str) -> Option<Vec<Segment<'_>>> {
	let mut rest = expr.trim();
	let mut out = vec![];
	loop {
		let len = rest.find(|ch: char| !is_ident_char(ch)).unwrap_or(rest.len());
		let name = &rest[..len];
		if !name.starts_with(|ch: char| ch.is_alphabetic() || ch == '_') {
			return None;
		}
		rest = &rest[len..];
		let mut segment = Segment {
			name,
			call: None,
			subscript: None,
		};
		loop {
			if rest.starts_with('(') {
				let close = closing_paren(rest, 1)?;
				segment.call = Some(&rest[1..close]);
				rest = &rest[close + 1..];
			} else if rest.starts_with('[') {
				let close = closing_paren(rest, 1)?;
				segment.subscript = Some(&rest[1..close]);
				rest = &rest[close + 1..];
			} else {
				break;
			}
		}
		out.push(segment);
		match rest.trim_start().strip_prefix('.') {
			Some(next) => rest = next.trim_start(),
			None => break,
		}
	}
	rest.trim().is_empty().then_some(out)
}

/// The dotted chain `text` ends with, balanced call groups included.
pub fn trailing_expr(text: &str) -> &str {
	let bytes = text.as_bytes();
	let mut start = text.len();
	let mut depth = 0usize;
	while start > 0 {
		let byte = bytes[start - 1];
		if depth > 0 {
			match byte {
				b')' | b']' => depth += 1,
				b'(' | b'[' => depth -= 1,
				_ => {}
			}
			start -= 1;
			continue;
		}
		match byte {
			b')' | b']' => depth = 1,
			b'.' | b'_' => {}
			byte if byte.is_ascii_alphanumeric() || !byte.is_ascii() => {}
			_ => break,
		}
		start -= 1;
	}
	if depth > 0 {
		return "";
	}
	text[start..].trim_start_matches('.')
}

/// Byte offset of the innermost bracket still open at the end of `text`, if it is a parenthesis.
fn open_call(text: &str) -> Option<usize> {
	let mut stack = vec![];
	let mut quote = None;
	let mut escaped = false;
	let mut comment = false;
	for (idx, ch) in text.char_indices() {
		if ch == '\n' {
			// Single-line strings and comments end with the line.
			comment = false;
			quote = None;
			continue;
		}
		if comment {
			continue;
		}
		if let Some(delim) = quote {
			if escaped {
				escaped = false;
			} else if ch == '\\' {
				escaped = true;
			} else if ch == delim {
				quote = None;
			}
			continue;
		}
		match ch {
			'\'' | '"' => quote = Some(ch),
			'#' => comment = true,
			'(' | '[' | '{' => stack.push((idx, ch)),
			')' | ']' | '}' => {
				stack.pop();
			}
			_ => {}
		}
	}
	match stack.last() {
		Some(&(idx, '(')) => Some(idx),
		_ => None,
	}
}

/// Whether the end of `line` sits in a comment or an unterminated string.
fn in_comment_or_string(line: &str) -> bool {
	let mut quote = None;
	let mut escaped = false;
	for ch in line.chars() {
		match quote {
			Some(_) if escaped => escaped = false,
			Some(_) if ch == '\\' => escaped = true,
			Some(delim) if ch == delim => quote = None,
			Some(_) => {}
			None if ch == '#' => return true,
			None if matches!(ch, '\'' | '"') => quote = Some(ch),
			None => {}
		}
	}
	quote.is_some()
}

/// Start of the last `lines` lines of `text`.
fn window_start(text: &str, lines: usize) -> usize {
	text.rmatch_indices('\n')
		.nth(lines.saturating_sub(1))
		.map(|(idx, _)| idx + 1)
		.unwrap_or(0)
}

/// Classifies the cursor at the end of `preceding`. First match wins:
/// entity-name, field-type, filter-kwargs, then the dotted kinds, where a
/// manager reading of `root.middle.` beats a related-field reading.
pub fn classify<'a>(index: &'a Index, preceding: &'a str, unit: &'a str) -> Option<Context<'a>> {
	let line = preceding.rsplit('\n').next().unwrap_or(preceding);
	let head = line.trim_end_matches(is_ident_char);
	let prefix = &line[head.len()..];

	if let Some(caps) = MODELS_IMPORT.captures(head) {
		if caps[1].ends_with("django.db.models") {
			return Some(Context::FieldType { prefix });
		}
		return Some(Context::EntityName { prefix });
	}
	if RELATION_TARGET.is_match(head) {
		return Some(Context::EntityName { prefix });
	}
	if in_comment_or_string(head) {
		trace!("cursor in comment or string");
		return None;
	}
	if FIELD_TYPE.is_match(head) {
		return Some(Context::FieldType { prefix });
	}

	let resolver = Resolver::new(index, preceding, unit);
	let body = &preceding[..preceding.len() - prefix.len()];
	let window = &body[window_start(body, index.settings().look_back)..];
	if let Some(context) = filter_kwargs(&resolver, window, prefix) {
		return Some(context);
	}

	let receiver = trailing_expr(head.strip_suffix('.')?);
	let chain = parse_chain(receiver)?;
	if let [root, middle] = chain.as_slice() {
		let plain = |segment: &Segment| segment.call.is_none() && segment.subscript.is_none();
		if plain(root) && plain(middle) {
			let owner = resolver.type_of(root.name).map(Type::entity);
			let is_manager = owner.is_some_and(|entity| entity.manager(middle.name).is_some())
				|| middle.name == DEFAULT_MANAGER
				|| MANAGER_SUFFIXES.iter().any(|suffix| middle.name.ends_with(suffix));
			if is_manager {
				return Some(Context::ManagerChain {
					entity: owner,
					manager: Some(middle.name),
					prefix,
				});
			}
			let related = owner.filter(|entity| entity.field(middle.name).is_some_and(Field::is_relational));
			if let Some(entity) = related {
				return Some(Context::RelatedFieldChain {
					entity,
					field: middle.name,
					prefix,
				});
			}
		}
	}

	match resolver.evaluate(&chain) {
		Some(Type::QuerySet(entity)) => Some(Context::ManagerChain {
			entity: Some(entity),
			manager: None,
			prefix,
		}),
		Some(ty) => Some(Context::InstanceAccess {
			entity: Some(ty.entity()),
			prefix,
		}),
		None if chain.len() == 1 && chain[0].call.is_none() => Some(Context::InstanceAccess { entity: None, prefix }),
		None => None,
	}
}

/// `receiver.filter(` with the cursor at a keyword position.
fn filter_kwargs<'a>(resolver: &Resolver<'a>, window: &str, prefix: &'a str) -> Option<Context<'a>> {
	let open = open_call(window)?;
	let typed = window[open + 1..].trim_end();
	if !typed.is_empty() && !typed.ends_with(',') {
		return None;
	}
	let chain = parse_chain(trailing_expr(&window[..open]))?;
	let (call, receiver) = chain.split_last()?;
	if call.call.is_some() || !FILTER_CALLS.contains(call.name) || receiver.is_empty() {
		return None;
	}
	let entity = match resolver.evaluate(receiver) {
		Some(Type::QuerySet(entity)) => Some(entity),
		_ => None,
	};
	Some(Context::FilterKwargs { entity, prefix })
}
