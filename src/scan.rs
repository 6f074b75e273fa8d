//! Pattern-based primitives over raw Python text.
//!
//! Nothing here knows what a model is. The [Scanner] trait is the only thing the
//! extractor sees, so a real incremental parser can replace [RegexScanner] later.

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

use crate::format_loc;
use crate::utils::{ByteOffset, ByteRange, RangeExt, indent_of, is_blank, slice};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScanError {
	#[error("unterminated call to `{callee}` at byte {offset}")]
	UnterminatedCall { callee: String, offset: usize },
	#[error("unterminated parameter list for `{0}`")]
	MalformedHeader(String),
	#[error("declaration `{0}` not found in unit")]
	MissingDeclaration(String),
}

/// A `class Name(bases):` header together with its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
	pub name: String,
	/// Raw base expressions, keyword arguments such as `metaclass=` dropped.
	pub bases: Vec<String>,
	pub indent: usize,
	/// Start of the header line.
	pub start: ByteOffset,
	/// Everything after the header colon up to the next line that dedents to the header or further.
	pub body: ByteRange,
}

/// `target = callee(args)` where the call may span lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallAssignment {
	pub target: String,
	pub callee: String,
	pub indent: usize,
	/// The whole statement, from the target to the closing parenthesis.
	pub stmt: ByteRange,
	/// The text between the parentheses.
	pub args: ByteRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodHeader {
	pub name: String,
	/// Decorator expressions without the `@` and without call arguments.
	pub decorators: Vec<String>,
	/// Raw parameters, receiver included.
	pub params: Vec<String>,
	pub indent: usize,
	pub start: ByteOffset,
	/// Header through the last line of the method body.
	pub span: ByteRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg<'a> {
	Positional(&'a str),
	Keyword(&'a str, &'a str),
}

pub trait Scanner {
	/// Every class-like declaration in `text`, nested ones included, in source order.
	fn declarations(&self, text: &str) -> Vec<Declaration>;

	/// Locates the first declaration named `name`.
	fn find_body(&self, text: &str, name: &str) -> Option<Declaration> {
		self.declarations(text).into_iter().find(|decl| decl.name == name)
	}

	/// Like [find_body](Scanner::find_body), for callers that want to report the miss.
	fn declaration(&self, text: &str, name: &str) -> Result<Declaration, ScanError> {
		self.find_body(text, name)
			.ok_or_else(|| ScanError::MissingDeclaration(name.to_string()))
	}

	/// Call assignments anywhere inside `body`. Unterminated calls are reported, not dropped silently.
	fn call_assignments(&self, text: &str, body: ByteRange) -> Vec<Result<CallAssignment, ScanError>>;

	/// Method headers anywhere inside `body`, including nested functions.
	fn methods(&self, text: &str, body: ByteRange) -> Vec<Result<MethodHeader, ScanError>>;
}

static CLASS_HEADER: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"(?m)^([ \t]*)class[ \t]+(\w+)[ \t]*(?:\(([^)]*)\))?[ \t]*:").expect(format_loc!("invalid regex"))
});

static CALL_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"(?m)^([ \t]*)(\w+)[ \t]*(?::[^=\n]+)?=[ \t]*([A-Za-z_][\w.]*)[ \t]*\(")
		.expect(format_loc!("invalid regex"))
});

static METHOD_HEADER: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"(?m)^([ \t]*)(?:async[ \t]+)?def[ \t]+(\w+)[ \t]*\(").expect(format_loc!("invalid regex"))
});

static KEYWORD: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"(?s)^(\w+)[ \t]*=([^=].*|)$").expect(format_loc!("invalid regex")));

#[derive(Default, Debug, Clone, Copy)]
pub struct RegexScanner;

impl Scanner for RegexScanner {
	fn declarations(&self, text: &str) -> Vec<Declaration> {
		CLASS_HEADER
			.captures_iter(text)
			.filter_map(|caps| {
				let whole = caps.get(0)?;
				let indent = caps.get(1)?.as_str().len();
				let name = caps.get(2)?.as_str().to_string();
				let bases = caps
					.get(3)
					.map(|bases| {
						split_args(bases.as_str())
							.into_iter()
							.filter_map(|arg| match parse_arg(arg) {
								Arg::Positional(base) => Some(base.to_string()),
								Arg::Keyword(..) => None,
							})
							.collect()
					})
					.unwrap_or_default();
				let body_start = whole.end();
				let body_end = block_end(text, body_start, indent);
				Some(Declaration {
					name,
					bases,
					indent,
					start: ByteOffset(whole.start()),
					body: ByteOffset(body_start)..ByteOffset(body_end),
				})
			})
			.collect()
	}

	fn call_assignments(&self, text: &str, body: ByteRange) -> Vec<Result<CallAssignment, ScanError>> {
		let base = body.start.0;
		let haystack = slice(text, body.clone());
		let mut out = vec![];
		// Keyword arguments on continuation lines look like assignments too.
		let mut consumed = 0;
		for caps in CALL_ASSIGNMENT.captures_iter(haystack) {
			let (Some(whole), Some(indent), Some(target), Some(callee)) = (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
			else {
				continue;
			};
			let start = base + whole.start();
			if start < consumed {
				continue;
			}
			let open = base + whole.end();
			let Some(close) = closing_paren(text, open) else {
				out.push(Err(ScanError::UnterminatedCall {
					callee: callee.as_str().to_string(),
					offset: start,
				}));
				continue;
			};
			consumed = close;
			let indent = indent.as_str().len();
			out.push(Ok(CallAssignment {
				target: target.as_str().to_string(),
				callee: callee.as_str().to_string(),
				indent,
				stmt: ByteOffset(start + indent)..ByteOffset(close + 1),
				args: ByteOffset(open)..ByteOffset(close),
			}));
		}
		out
	}

	fn methods(&self, text: &str, body: ByteRange) -> Vec<Result<MethodHeader, ScanError>> {
		let base = body.start.0;
		let haystack = slice(text, body.clone());
		METHOD_HEADER
			.captures_iter(haystack)
			.filter_map(|caps| {
				let whole = caps.get(0)?;
				let indent = caps.get(1)?.as_str().len();
				let name = caps.get(2)?.as_str().to_string();
				let open = base + whole.end();
				let Some(close) = closing_paren(text, open) else {
					return Some(Err(ScanError::MalformedHeader(name)));
				};
				let params = split_args(&text[open..close])
					.into_iter()
					.map(|param| param.to_string())
					.collect();
				let start = base + whole.start();
				let decorators = decorators_above(text, start, indent);
				let end = block_end(text, close, indent).min(body.end.0.max(close));
				Some(Ok(MethodHeader {
					name,
					decorators,
					params,
					indent,
					start: ByteOffset(start),
					span: ByteOffset(start)..ByteOffset(end),
				}))
			})
			.collect()
	}
}

/// Byte offset where the block opened at `from` ends: the start of the first
/// non-blank line indented at or left of `indent`, or the end of `text`.
fn block_end(text: &str, from: usize, indent: usize) -> usize {
	// The rest of the header line belongs to the block (`class Meta: abstract = True`).
	let Some(newline) = text[from..].find('\n') else {
		return text.len();
	};
	let mut offset = from + newline + 1;
	for line in text[offset..].split_inclusive('\n') {
		let content = line.trim_end_matches(['\n', '\r']);
		if !is_blank(content) && indent_of(content) <= indent {
			return offset;
		}
		offset += line.len();
	}
	text.len()
}

/// `@decorator` names directly above the header at `start`.
fn decorators_above(text: &str, start: usize, indent: usize) -> Vec<String> {
	let mut out = vec![];
	for line in text[..start].lines().rev() {
		let trimmed = line.trim();
		if trimmed.is_empty() {
			continue;
		}
		let Some(decorator) = trimmed.strip_prefix('@') else {
			break;
		};
		if indent_of(line) != indent {
			break;
		}
		let name = decorator.split(['(', ' ', '\t']).next().unwrap_or(decorator);
		out.push(name.to_string());
	}
	out.reverse();
	out
}

/// Given the offset right after an opening parenthesis, returns the offset of its partner.
pub fn closing_paren(text: &str, open: usize) -> Option<usize> {
	let mut depth = 1usize;
	let mut quote = None;
	let mut escaped = false;
	let mut comment = false;
	for (idx, ch) in text[open..].char_indices() {
		if comment {
			comment = ch != '\n';
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
			'(' | '[' | '{' => depth += 1,
			')' | ']' | '}' => {
				depth -= 1;
				if depth == 0 {
					return Some(open + idx);
				}
			}
			_ => {}
		}
	}
	trace!(open, "no closing parenthesis");
	None
}

/// Splits an argument list on top-level commas, trimming each item and dropping empty ones.
pub fn split_args(args: &str) -> Vec<&str> {
	let mut out = vec![];
	let mut depth = 0usize;
	let mut quote = None;
	let mut escaped = false;
	let mut comment = false;
	let mut start = 0;
	for (idx, ch) in args.char_indices() {
		if comment {
			comment = ch != '\n';
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
			'(' | '[' | '{' => depth += 1,
			')' | ']' | '}' => depth = depth.saturating_sub(1),
			',' if depth == 0 => {
				out.push(&args[start..idx]);
				start = idx + 1;
			}
			_ => {}
		}
	}
	out.push(&args[start..]);
	out.into_iter()
		.map(strip_comments)
		.filter(|arg| !arg.is_empty())
		.collect()
}

/// Trims an argument, dropping trailing `# comment` lines outside of strings.
fn strip_comments(arg: &str) -> &str {
	let mut end = arg.len();
	let mut quote = None;
	for (idx, ch) in arg.char_indices() {
		match (quote, ch) {
			(Some(delim), ch) if ch == delim => quote = None,
			(Some(_), _) => {}
			(None, '\'' | '"') => quote = Some(ch),
			(None, '#') => {
				end = idx;
				break;
			}
			_ => {}
		}
	}
	let head = arg[..end].trim();
	if end < arg.len() {
		// A comment may end a line followed by more of the same argument.
		let rest = arg[end..].split_once('\n').map(|(_, rest)| strip_comments(rest));
		if let Some(rest) = rest.filter(|rest| !rest.is_empty()) {
			if head.is_empty() {
				return rest;
			}
		}
	}
	head
}

pub fn parse_arg(arg: &str) -> Arg<'_> {
	match KEYWORD.captures(arg) {
		Some(caps) => match (caps.get(1), caps.get(2)) {
			(Some(key), Some(value)) => Arg::Keyword(key.as_str(), value.as_str().trim()),
			_ => Arg::Positional(arg),
		},
		None => Arg::Positional(arg),
	}
}

/// Strips one layer of matching quotes, including string prefixes like `r` or `_(`..`)`.
pub fn string_literal(expr: &str) -> Option<&str> {
	let expr = expr.trim();
	let expr = expr
		.strip_prefix("_(")
		.or_else(|| expr.strip_prefix("gettext_lazy("))
		.or_else(|| expr.strip_prefix("gettext("))
		.and_then(|inner| inner.strip_suffix(')'))
		.map(str::trim)
		.unwrap_or(expr);
	let expr = expr.trim_start_matches(['r', 'u', 'b', 'R', 'U', 'B']);
	for delim in ["\"\"\"", "'''", "\"", "'"] {
		if let Some(inner) = expr.strip_prefix(delim).and_then(|rest| rest.strip_suffix(delim)) {
			return Some(inner);
		}
	}
	None
}

/// Maps byte offsets to 0-based line numbers.
#[derive(Debug, Clone)]
pub struct LineIndex {
	starts: Vec<usize>,
}

impl LineIndex {
	pub fn new(text: &str) -> Self {
		let starts = core::iter::once(0)
			.chain(text.match_indices('\n').map(|(idx, _)| idx + 1))
			.collect();
		Self { starts }
	}

	pub fn line_of(&self, offset: ByteOffset) -> u32 {
		match self.starts.binary_search(&offset.0) {
			Ok(line) => line as u32,
			Err(next) => next.saturating_sub(1) as u32,
		}
	}
}

/// Whether `offset` lies in one of the method spans.
pub fn inside_any(offset: ByteOffset, spans: &[ByteRange]) -> bool {
	spans.iter().any(|span| span.clone().map_unit(|unit| unit.0).contains(&offset.0))
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	fn body_of<'t>(text: &'t str, name: &str) -> &'t str {
		let decl = RegexScanner.find_body(text, name).expect("declaration");
		slice(text, decl.body)
	}

	#[test]
	fn test_find_body_boundaries() {
		let text = r#"
class Author(models.Model):
    name = models.CharField(max_length=100)
class Book(models.Model):
    title = models.CharField(max_length=200)

    def __str__(self):
        return self.title

def helper():
    pass

class Plain:
    x = 1
"#;
		let author = body_of(text, "Author");
		assert!(author.contains("name = "));
		assert!(!author.contains("class Book"), "body leaked into sibling: {author:?}");

		let book = body_of(text, "Book");
		assert!(book.contains("return self.title"));
		assert!(!book.contains("helper"));

		let plain = RegexScanner.find_body(text, "Plain").expect("no parent list");
		assert_eq!(plain.bases, Vec::<String>::new());
		assert!(slice(text, plain.body).contains("x = 1"));
	}

	#[test]
	fn test_first_match_wins() {
		let text = "class A(models.Model):\n    x = 1\nclass A(models.Model):\n    y = 2\n";
		assert!(body_of(text, "A").contains("x = 1"));
	}

	#[test]
	fn test_multiline_bases() {
		let text = "class Article(\n    TimeStamped,\n    models.Model,\n    metaclass=Meta,\n):\n    pass\n";
		let decl = RegexScanner.find_body(text, "Article").expect("declaration");
		assert_eq!(decl.bases, ["TimeStamped", "models.Model"]);
	}

	#[test]
	fn test_nested_meta_is_inside_body() {
		let text = r#"class Base(models.Model):
    created = models.DateTimeField(auto_now_add=True)

    class Meta:
        abstract = True

    updated = models.DateTimeField(auto_now=True)
"#;
		let body = body_of(text, "Base");
		assert!(body.contains("updated"));
		let meta = RegexScanner.find_body(text, "Meta").expect("meta");
		assert_eq!(slice(text, meta.body).trim(), "abstract = True");
	}

	#[test]
	fn test_call_assignments_span_lines() {
		let text = r#"class Book(models.Model):
    title = models.CharField(
        max_length=200,
        help_text="The (full) title",
    )
    tags = models.ManyToManyField("Tag", blank=True)
"#;
		let decl = RegexScanner.find_body(text, "Book").expect("declaration");
		let calls = RegexScanner
			.call_assignments(text, decl.body)
			.into_iter()
			.collect::<Result<Vec<_>, _>>()
			.expect("calls");
		assert_eq!(calls.len(), 2);
		assert_eq!(calls[0].target, "title");
		assert_eq!(calls[0].callee, "models.CharField");
		let args = split_args(slice(text, calls[0].args.clone()));
		assert_eq!(args, ["max_length=200", "help_text=\"The (full) title\""]);
		assert_eq!(calls[1].callee, "models.ManyToManyField");
		assert!(slice(text, calls[1].stmt.clone()).starts_with("tags = "));
	}

	#[test]
	fn test_unterminated_call_reported() {
		let text = "class Book(models.Model):\n    title = models.CharField(max_length=\n";
		let decl = RegexScanner.find_body(text, "Book").expect("declaration");
		let calls = RegexScanner.call_assignments(text, decl.body);
		assert!(matches!(calls.as_slice(), [Err(ScanError::UnterminatedCall { .. })]));
	}

	#[test]
	fn test_methods_and_decorators() {
		let text = r#"class Product(models.Model):
    @property
    def sale_price(self):
        return self.price * 0.9

    @classmethod
    def from_sku(cls, sku, *, strict=False):
        return cls.objects.get(sku=sku)

    def is_in_stock(self):
        stock = models.IntegerField()
        return True
"#;
		let decl = RegexScanner.find_body(text, "Product").expect("declaration");
		let methods = RegexScanner
			.methods(text, decl.body)
			.into_iter()
			.collect::<Result<Vec<_>, _>>()
			.expect("methods");
		let names = methods.iter().map(|m| m.name.as_str()).collect::<Vec<_>>();
		assert_eq!(names, ["sale_price", "from_sku", "is_in_stock"]);
		assert_eq!(methods[0].decorators, ["property"]);
		assert_eq!(methods[1].decorators, ["classmethod"]);
		assert_eq!(methods[1].params, ["cls", "sku", "*", "strict=False"]);
		assert!(methods[2].decorators.is_empty());

		let stock = text.find("stock = models").expect("stock");
		let spans = methods.iter().map(|m| m.span.clone()).collect::<Vec<_>>();
		assert!(inside_any(ByteOffset(stock), &spans));
	}

	#[test]
	fn test_parse_arg() {
		assert_eq!(parse_arg("null=True"), Arg::Keyword("null", "True"));
		assert_eq!(parse_arg("'Author'"), Arg::Positional("'Author'"));
		assert_eq!(parse_arg("x == y"), Arg::Positional("x == y"));
		assert_eq!(string_literal("_('Title')"), Some("Title"));
		assert_eq!(string_literal(r#""a.B""#), Some("a.B"));
		assert_eq!(string_literal("Author"), None);
	}

	#[test]
	fn test_split_args_comments() {
		let args = "\n    'Author',  # the writer\n    on_delete=models.CASCADE,\n";
		assert_eq!(split_args(args), ["'Author'", "on_delete=models.CASCADE"]);
	}

	#[test]
	fn test_line_index() {
		let index = LineIndex::new("a\nbb\nccc");
		assert_eq!(index.line_of(ByteOffset(0)), 0);
		assert_eq!(index.line_of(ByteOffset(2)), 1);
		assert_eq!(index.line_of(ByteOffset(4)), 1);
		assert_eq!(index.line_of(ByteOffset(5)), 2);
	}
}
