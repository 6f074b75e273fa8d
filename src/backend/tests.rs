use super::*;
use pretty_assertions::assert_eq;

fn candidate(name: &str, insertion: Insertion) -> Candidate {
	Candidate {
		name: name.to_string(),
		kind: CandidateKind::Field,
		detail: "CharField field".to_string(),
		insertion,
		documentation: None,
	}
}

fn new_text(item: &CompletionItem) -> &str {
	match &item.text_edit {
		Some(CompletionTextEdit::Edit(edit)) => &edit.new_text,
		other => panic!("unexpected edit {other:?}"),
	}
}

#[test]
fn test_models_units() {
	assert!(Backend::is_models_unit(Path::new("/src/shop/models.py")));
	assert!(Backend::is_models_unit(Path::new("/src/shop/models/product.py")));
	assert!(!Backend::is_models_unit(Path::new("/src/shop/views.py")));
	assert!(!Backend::is_models_unit(Path::new("/src/shop/models/README.md")));
}

#[test]
fn test_completion_snippets() {
	let range = Range::new(Position::new(0, 20), Position::new(0, 22));
	let cases = [
		(Insertion::Bare, "title", None),
		(Insertion::Keyword, "title=$0", Some(InsertTextFormat::SNIPPET)),
		(Insertion::Call { args: true }, "title($0)", Some(InsertTextFormat::SNIPPET)),
		(Insertion::Call { args: false }, "title()", Some(InsertTextFormat::SNIPPET)),
		(Insertion::QuotedCall, "title('$0')", Some(InsertTextFormat::SNIPPET)),
	];
	for (insertion, expected, format) in cases {
		let item = completion_item(candidate("title", insertion), range);
		assert_eq!(new_text(&item), expected);
		assert_eq!(item.insert_text_format, format);
		assert!(item.command.is_none());
	}

	let item = completion_item(candidate("author__", Insertion::Traverse), range);
	assert_eq!(new_text(&item), "author__$0");
	assert_eq!(
		item.command.map(|command| command.command).as_deref(),
		Some("editor.action.triggerSuggest")
	);
}

#[test]
fn test_config_section() {
	let nested = serde_json::json!({ "django-lsp": { "completions": { "limit": 20 } } });
	let config = Backend::config_from_value(nested).expect("config");
	assert_eq!(config.completions.and_then(|c| c.limit), Some(20));

	let flat = serde_json::json!({ "resolver": { "lookBack": 5 } });
	let config = Backend::config_from_value(flat).expect("config");
	assert_eq!(config.resolver.and_then(|r| r.look_back), Some(5));

	assert!(Backend::config_from_value(serde_json::json!({ "cache": 3 })).is_none());
}

#[test]
fn test_word_at() {
	let rope = Rope::from_str("from shop.models import Product\nProduct.objects.filter(name='x')\n");
	let (word, preceding, range) = Backend::word_at(&rope, Position::new(1, 18), 10).expect("word");
	assert_eq!(word, "filter");
	assert_eq!(preceding, "from shop.models import Product\nProduct.objects.");
	assert_eq!(range, Range::new(Position::new(1, 16), Position::new(1, 22)));

	let (_, preceding, _) = Backend::word_at(&rope, Position::new(1, 18), 0).expect("word");
	assert_eq!(preceding, "Product.objects.");
	// The cursor right after a word still names it.
	let (word, _, _) = Backend::word_at(&rope, Position::new(1, 15), 10).expect("word");
	assert_eq!(word, "objects");

	let blank = Rope::from_str("x = (  )\n");
	assert!(Backend::word_at(&blank, Position::new(0, 6), 10).is_none());
}
