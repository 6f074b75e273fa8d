use core::fmt::Display;
use core::ops::{Add, Sub};

use ropey::Rope;
use tower_lsp_server::lsp_types::Position;

/// Unwraps the option in the context of a function that returns [`Result<Option<_>>`].
#[macro_export]
macro_rules! some {
	($opt:expr) => {
		match $opt {
			Some(it) => it,
			None => {
				tracing::trace!(concat!(stringify!($opt), " = None"));
				return Ok(None);
			}
		}
	};
}

/// Early return, with optional message passed to [`format_loc`](crate::format_loc!).
#[macro_export]
macro_rules! ok {
    ($res:expr $(,)?) => {
    	anyhow::Context::context($res, concat!($crate::loc!(), " ", stringify!($res)))?
    };
    ($res:expr, $($tt:tt)+) => {
		anyhow::Context::with_context($res, || $crate::format_loc!($($tt)+))?
    }
}

#[macro_export]
macro_rules! loc {
	() => {
		concat!("[", file!(), ":", line!(), ":", column!(), "]")
	};
}

#[macro_export]
macro_rules! errloc {
	($msg:literal $(, $($tt:tt)* )?) => {
		::anyhow::anyhow!(concat!($crate::loc!(), " ", $msg) $(, $($tt)* )?)
	}
}

/// [format] preceded with file location information.
/// If no arguments are passed, a string literal is returned.
#[macro_export]
macro_rules! format_loc {
	($tpl:literal) => {
		concat!($crate::loc!(), " ", $tpl)
	};
	($tpl:literal $($tt:tt)*) => {
		format!($crate::format_loc!($tpl) $($tt)*)
	};
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ByteOffset(pub usize);
pub type ByteRange = core::ops::Range<ByteOffset>;

impl From<usize> for ByteOffset {
	#[inline]
	fn from(value: usize) -> Self {
		ByteOffset(value)
	}
}

impl Add<usize> for ByteOffset {
	type Output = ByteOffset;
	#[inline]
	fn add(self, rhs: usize) -> Self::Output {
		ByteOffset(self.0 + rhs)
	}
}

impl Sub<usize> for ByteOffset {
	type Output = ByteOffset;
	#[inline]
	fn sub(self, rhs: usize) -> Self::Output {
		ByteOffset(self.0.saturating_sub(rhs))
	}
}

pub trait RangeExt {
	type Unit;
	fn map_unit<F, V>(self, op: F) -> core::ops::Range<V>
	where
		F: FnMut(Self::Unit) -> V;

	fn contains_end(&self, value: Self::Unit) -> bool
	where
		Self::Unit: PartialOrd;
}

impl<T> RangeExt for core::ops::Range<T> {
	type Unit = T;

	#[inline]
	fn map_unit<F, V>(self, mut op: F) -> core::ops::Range<V>
	where
		F: FnMut(Self::Unit) -> V,
	{
		op(self.start)..op(self.end)
	}

	#[inline]
	fn contains_end(&self, value: Self::Unit) -> bool
	where
		Self::Unit: PartialOrd,
	{
		self.contains(&value) || self.end == value
	}
}

/// Slices `text` with a [ByteRange].
#[inline]
pub fn slice(text: &str, range: ByteRange) -> &str {
	&text[range.map_unit(|unit| unit.0)]
}

/// Number of leading whitespace columns, tabs counted as one.
#[inline]
pub fn indent_of(line: &str) -> usize {
	line.len() - line.trim_start().len()
}

/// Whether the line carries no code, i.e. it is empty or only a comment.
#[inline]
pub fn is_blank(line: &str) -> bool {
	let line = line.trim_start();
	line.is_empty() || line.starts_with('#')
}

/// Returns the last `count` lines of `text`, the line being edited included.
pub fn tail_lines(text: &str, count: usize) -> Vec<&str> {
	let mut lines = text.split('\n').rev().take(count).collect::<Vec<_>>();
	lines.reverse();
	lines
}

/// `snake_case` to `CamelCase`.
pub fn camel_case(ident: &str) -> String {
	let mut out = String::with_capacity(ident.len());
	for segment in ident.split('_').filter(|seg| !seg.is_empty()) {
		let mut chars = segment.chars();
		if let Some(first) = chars.next() {
			out.extend(first.to_uppercase());
			out.push_str(chars.as_str());
		}
	}
	out
}

#[inline]
pub fn is_capitalized(ident: &str) -> bool {
	ident.chars().next().is_some_and(char::is_uppercase)
}

#[derive(Default)]
pub struct MaxVec<T>(Vec<T>);

impl<T> MaxVec<T> {
	pub fn new(limit: usize) -> Self {
		MaxVec(Vec::with_capacity(limit))
	}
	#[inline]
	fn remaining_space(&self) -> usize {
		self.0.capacity().saturating_sub(self.0.len())
	}
	#[inline]
	pub fn has_space(&self) -> bool {
		self.remaining_space() > 0
	}
	pub fn extend(&mut self, items: impl Iterator<Item = T>) {
		self.0.extend(items.take(self.remaining_space()));
	}
	pub fn push_checked(&mut self, item: T) {
		if self.has_space() {
			self.0.push(item);
		}
	}
	#[inline]
	pub fn into_inner(self) -> Vec<T> {
		self.0
	}
}

impl<T> core::ops::Deref for MaxVec<T> {
	type Target = Vec<T>;
	#[inline]
	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

/// LSP positions count UTF-16 code units within a line.
pub fn position_to_offset(position: Position, rope: &Rope) -> Option<ByteOffset> {
	let line_start = rope.try_line_to_char(position.line as usize).ok()?;
	let target = rope.char_to_utf16_cu(line_start) + position.character as usize;
	if target > rope.len_utf16_cu() {
		return None;
	}
	let char_idx = rope.utf16_cu_to_char(target);
	rope.try_char_to_byte(char_idx).ok().map(ByteOffset)
}

pub fn offset_to_position(offset: ByteOffset, rope: &Rope) -> Option<Position> {
	let char_idx = rope.try_byte_to_char(offset.0).ok()?;
	let line = rope.try_char_to_line(char_idx).ok()?;
	let line_start = rope.line_to_char(line);
	let character = rope.char_to_utf16_cu(char_idx) - rope.char_to_utf16_cu(line_start);
	Some(Position::new(line as u32, character as u32))
}

pub trait DisplayExt {
	fn display(self) -> impl Display;
}

impl<T: Display> DisplayExt for Option<T> {
	fn display(self) -> impl Display {
		struct Adapter<T>(Option<T>);
		impl<T: Display> Display for Adapter<T> {
			fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				match &self.0 {
					Some(value) => value.fmt(f),
					None => Ok(()),
				}
			}
		}
		Adapter(self)
	}
}

#[cfg(test)]
pub fn init_for_test() {
	use std::sync::Once;
	use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

	static INIT: Once = Once::new();
	INIT.call_once(|| {
		tracing_subscriber::registry()
			.with(tracing_subscriber::fmt::layer().with_test_writer())
			.with(EnvFilter::from("info,django_lsp=trace"))
			.init();
	});
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn test_camel_case() {
		assert_eq!(camel_case("blog_post"), "BlogPost");
		assert_eq!(camel_case("author"), "Author");
		assert_eq!(camel_case("_private__name"), "PrivateName");
	}

	#[test]
	fn test_tail_lines() {
		let text = "a\nb\nc\nd";
		assert_eq!(tail_lines(text, 2), ["c", "d"]);
		assert_eq!(tail_lines(text, 10), ["a", "b", "c", "d"]);
		assert_eq!(tail_lines("", 3), [""]);
	}

	#[test]
	fn test_max_vec() {
		let mut items = MaxVec::new(3);
		items.extend(0..10);
		items.push_checked(42);
		assert_eq!(items.into_inner(), [0, 1, 2]);
	}

	#[test]
	fn test_indent() {
		assert_eq!(indent_of("    x = 1"), 4);
		assert!(is_blank("   # comment"));
		assert!(is_blank(""));
		assert!(!is_blank("  pass"));
	}

	#[test]
	fn test_position_conversion() {
		// The emoji takes two UTF-16 code units and four bytes.
		let rope = Rope::from_str("a = 1\nb = 'é😀'.x\n");
		let dot = position_to_offset(Position::new(1, 9), &rope);
		assert_eq!(dot, Some(ByteOffset(18)));
		assert_eq!(offset_to_position(ByteOffset(18), &rope), Some(Position::new(1, 9)));
		assert_eq!(position_to_offset(Position::new(7, 0), &rope), None);
	}
}
