use super::*;
use crate::config::Settings;
use crate::test_utils::{LIBRARY, LIBRARY_PATH, library_index};
use pretty_assertions::assert_eq;

const VIEWS: &str = "library/views.py";

fn names(candidates: &[Candidate]) -> Vec<&str> {
	candidates.iter().map(|candidate| candidate.name.as_str()).collect()
}

fn find<'c>(candidates: &'c [Candidate], name: &str) -> &'c Candidate {
	candidates
		.iter()
		.find(|candidate| candidate.name == name)
		.unwrap_or_else(|| panic!("no candidate {name} in {:?}", names(candidates)))
}

#[test]
fn test_filter_kwargs_traverse_relations() {
	let index = library_index();
	let candidates = index.resolve_completions("Book.objects.filter(", VIEWS);
	let names = names(&candidates);
	for expected in [
		"title",
		"title__icontains",
		"author",
		"author__name",
		"author__name__startswith",
		"tags__label",
		"pages__gte",
	] {
		assert!(names.contains(&expected), "{expected} missing from {names:?}");
	}
	// The related model is known, so there is no bare traversal stub.
	assert!(!names.contains(&"author__"));
	// Reverse accessors of the related model are not traversed again.
	assert!(!names.contains(&"author__book_set"));

	let title = find(&candidates, "title");
	assert_eq!(title.kind, CandidateKind::Field);
	assert_eq!(title.insertion, Insertion::Keyword);
	assert_eq!(title.detail, "CharField field");
	assert_eq!(title.documentation.as_deref(), Some("Full title"));
	assert_eq!(find(&candidates, "title__icontains").kind, CandidateKind::Lookup);
}

#[test]
fn test_filter_kwargs_on_reverse_side() {
	let index = library_index();
	let candidates = index.resolve_completions("Author.objects.filter(bo", VIEWS);
	let names = names(&candidates);
	// Reverse relations are queried by model name, not by their `_set` accessor.
	assert!(names.contains(&"book"), "{names:?}");
	assert!(names.contains(&"book__title"), "{names:?}");
	assert!(names.contains(&"book__pages__range"), "{names:?}");
	assert!(names.iter().all(|name| name.starts_with("book") && !name.starts_with("book_set")));
	assert_eq!(find(&candidates, "book").detail, "Reverse relation from Book");

	let candidates = index.resolve_completions("Tag.objects.filter(", VIEWS);
	let names = self::names(&candidates);
	assert!(names.contains(&"books__title"), "{names:?}");
}

#[test]
fn test_filter_kwargs_related_query_name() {
	let mut index = library_index();
	index.analyze_unit(
		r#"from django.db import models

class Shelf(models.Model):
    code = models.CharField(max_length=8)

class Copy(models.Model):
    shelf = models.ForeignKey(Shelf, related_name='copies', related_query_name='copy', on_delete=models.CASCADE)
    barcode = models.CharField(max_length=20)
"#,
		"stock/models.py",
	);
	let shelf = index.get_entity("Shelf").expect("Shelf");
	assert!(shelf.field("copies").is_some());

	let candidates = index.resolve_completions("Shelf.objects.filter(", VIEWS);
	let names = names(&candidates);
	assert!(names.contains(&"copy__barcode"), "{names:?}");
	assert!(!names.iter().any(|name| name.starts_with("copies")), "{names:?}");
}

#[test]
fn test_unresolved_relation_offers_traversal() {
	let mut index = library_index();
	index.analyze_unit(
		"from django.db import models\n\nclass Review(models.Model):\n    item = models.ForeignKey('shop.Item', on_delete=models.CASCADE)\n",
		"reviews/models.py",
	);
	let candidates = index.resolve_completions("Review.objects.filter(it", VIEWS);
	let traverse = find(&candidates, "item__");
	assert_eq!(traverse.insertion, Insertion::Traverse);
}

#[test]
fn test_instance_access() {
	let index = library_index();
	let candidates = index.resolve_completions("x = Book.objects.get(pk=1)\nx.", VIEWS);
	assert_eq!(
		names(&candidates),
		[
			"title",
			"author",
			"pages",
			"tags",
			"is_published",
			"summary",
			"is_long",
			"save",
			"delete",
			"get_absolute_url",
			"clean",
			"full_clean",
			"pk",
			"id",
		]
	);
	let summary = find(&candidates, "summary");
	assert_eq!(summary.detail, "summary(length=100)");
	assert_eq!(summary.insertion, Insertion::Call { args: true });
	assert_eq!(find(&candidates, "is_long").insertion, Insertion::Call { args: false });
	assert_eq!(
		find(&candidates, "save").documentation.as_deref(),
		Some("Saves the current instance")
	);
}

#[test]
fn test_properties_insert_bare() {
	let index = library_index();
	let candidates = index.resolve_completions("author = Author.objects.first()\nauthor.di", VIEWS);
	let display = find(&candidates, "display_name");
	assert_eq!(display.kind, CandidateKind::Property);
	assert_eq!(display.insertion, Insertion::Bare);
	assert_eq!(names(&candidates), ["display_name"]);
}

#[test]
fn test_custom_manager() {
	let index = library_index();
	let candidates = index.resolve_completions("Book.catalog.", VIEWS);
	let names = names(&candidates);
	assert!(names.contains(&"published"));
	assert!(names.contains(&"by_author"));
	assert!(names.contains(&"filter"));
	assert_eq!(find(&candidates, "published").kind, CandidateKind::Method);

	let stock = index.resolve_completions("Book.objects.", VIEWS);
	assert!(!self::names(&stock).contains(&"published"));
	assert!(!self::names(&stock).contains(&"add"));
}

#[test]
fn test_queryset_insertions() {
	let index = library_index();
	let candidates = index.resolve_completions("Book.objects.", VIEWS);
	assert_eq!(find(&candidates, "filter").insertion, Insertion::Call { args: true });
	assert_eq!(find(&candidates, "order_by").insertion, Insertion::QuotedCall);
	assert_eq!(find(&candidates, "all").insertion, Insertion::Call { args: false });
	assert_eq!(find(&candidates, "all").detail, "() -> QuerySet");
	assert_eq!(find(&candidates, "all").kind, CandidateKind::QuerySetOp);
}

#[test]
fn test_reverse_manager() {
	let index = library_index();
	let candidates = index.resolve_completions("author = Author.objects.first()\nauthor.book_set.", VIEWS);
	let names = names(&candidates);
	for expected in ["filter", "add", "remove", "clear", "set", "create"] {
		assert!(names.contains(&expected), "{expected} missing from {names:?}");
	}
	assert_eq!(names.iter().filter(|name| **name == "create").count(), 1);
}

#[test]
fn test_related_field_chain() {
	let index = library_index();
	let candidates = index.resolve_completions("book = Book.objects.first()\nbook.author.", VIEWS);
	let names = names(&candidates);
	assert!(names.contains(&"name"));
	assert!(names.contains(&"display_name"));
	assert!(names.contains(&"book_set"));
}

#[test]
fn test_unknown_manager_is_empty() {
	let index = library_index();
	assert_eq!(index.resolve_completions("Book.archive_manager.", VIEWS), vec![]);
	assert_eq!(index.resolve_completions("thing.objects.", VIEWS), vec![]);
	assert_eq!(index.resolve_completions("mystery.", VIEWS), vec![]);
}

#[test]
fn test_entity_names_and_field_types() {
	let index = library_index();
	let candidates = index.resolve_completions("from library.models import Au", VIEWS);
	assert_eq!(names(&candidates), ["Author"]);
	assert_eq!(candidates[0].detail, "library model");

	let types = index.resolve_completions("    rating = models.Int", LIBRARY_PATH);
	let names = names(&types);
	assert!(names.contains(&"IntegerField"));
	assert!(names.iter().all(|name| name.starts_with("Int")));
	assert!(names.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn test_limit() {
	let mut index = Index::new(Settings {
		completions_limit: 3,
		..Default::default()
	});
	index.analyze_unit(LIBRARY, LIBRARY_PATH);
	let candidates = index.resolve_completions("Book.objects.filter(", VIEWS);
	assert_eq!(names(&candidates), ["title", "title__exact", "title__iexact"]);
}
