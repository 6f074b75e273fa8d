//! Same-unit base class merging and framework defaults.

use std::collections::HashSet;

use tracing::{debug, trace};

use super::{Entity, Manager, Method, MethodKind, Origin};
use crate::data::{DEFAULT_MANAGER, DEFAULT_METHODS, DEFAULT_PROPERTIES, FRAMEWORK_BASES};
use crate::model::Extractor;
use crate::scan::{Declaration, Scanner};

/// Merges members of same-unit bases into `entity`, depth-first in base order.
///
/// Names already on `entity` are kept, so the descendant wins over its bases
/// and an earlier base wins over a later one. Bases declared in other units are skipped.
pub fn merge_bases<S: Scanner>(extractor: &Extractor<'_, S>, entity: &mut Entity, decl: &Declaration) {
	let mut visited = HashSet::from([decl.name.clone()]);
	merge_from(extractor, entity, &decl.bases, &mut visited);
}

fn merge_from<S: Scanner>(
	extractor: &Extractor<'_, S>,
	entity: &mut Entity,
	bases: &[String],
	visited: &mut HashSet<String>,
) {
	for base in bases {
		if FRAMEWORK_BASES.contains(base.as_str()) || !visited.insert(base.clone()) {
			continue;
		}
		let Some(base_decl) = extractor.declaration(base) else {
			debug!(entity = %entity.name, %base, "base not declared in this unit");
			continue;
		};
		let members = extractor.members(base_decl, &entity.name);
		for mut field in members.fields {
			if field.origin == Origin::Declared {
				field.origin = Origin::Inherited { from: base.clone() };
			}
			if !entity.merge_field(field) {
				trace!(entity = %entity.name, %base, "field overridden by descendant");
			}
		}
		for method in members.methods {
			entity.merge_method(method);
		}
		for property in &members.properties {
			entity.merge_property(property);
		}
		for manager in members.managers {
			entity.merge_manager(manager);
		}
		merge_from(extractor, entity, &base_decl.bases, visited);
	}
}

/// Appends framework instance methods and properties, then the default manager if absent.
pub fn append_defaults(entity: &mut Entity) {
	for default in DEFAULT_METHODS {
		entity.merge_method(Method {
			name: default.name.to_string(),
			kind: MethodKind::Instance,
			params: default.params.iter().map(ToString::to_string).collect(),
			location: None,
		});
	}
	for property in DEFAULT_PROPERTIES {
		entity.merge_property(property);
	}
	if entity.manager(DEFAULT_MANAGER).is_none() {
		entity.managers.insert(0, Manager::default_manager());
	}
}

#[cfg(test)]
mod tests {
	use crate::model::{Extractor, Origin};
	use crate::scan::RegexScanner;
	use pretty_assertions::assert_eq;

	const UNIT: &str = r#"
class TimeStamped(models.Model):
    created = models.DateTimeField(auto_now_add=True)
    note = models.CharField(max_length=10)

    def touch(self):
        pass

    class Meta:
        abstract = True

class Owned(models.Model):
    owner = models.ForeignKey('self', on_delete=models.CASCADE)
    note = models.TextField()

    def touch(self, force):
        pass

class Article(TimeStamped, Owned):
    note = models.TextField(help_text="Mine")

    def pk(self):
        pass
"#;

	#[test]
	fn test_descendant_and_first_base_win() {
		crate::utils::init_for_test();
		let unit = Extractor::new(&RegexScanner, UNIT, "blog/models.py").run();
		let article = unit.entities.iter().find(|e| e.name == "Article").expect("article");

		let fields = article
			.fields
			.iter()
			.map(|f| (f.name.as_str(), f.origin.clone()))
			.collect::<Vec<_>>();
		assert_eq!(
			fields,
			[
				("note", Origin::Declared),
				(
					"created",
					Origin::Inherited {
						from: "TimeStamped".to_string()
					}
				),
				("owner", Origin::Inherited { from: "Owned".to_string() }),
			]
		);
		assert_eq!(article.field("note").and_then(|f| f.help_text.as_deref()), Some("Mine"));
		// `'self'` on a base points at the descendant.
		assert_eq!(
			article.field("owner").and_then(|f| f.related_entity.as_deref()),
			Some("Article")
		);
		assert!(article.method("touch").is_some_and(|m| m.params.is_empty()));
	}

	#[test]
	fn test_defaults_appended_after_real_members() {
		let unit = Extractor::new(&RegexScanner, UNIT, "blog/models.py").run();
		let article = unit.entities.iter().find(|e| e.name == "Article").expect("article");
		let methods = article.methods.iter().map(|m| m.name.as_str()).collect::<Vec<_>>();
		assert_eq!(
			methods,
			["pk", "touch", "save", "delete", "get_absolute_url", "clean", "full_clean"]
		);
		assert_eq!(article.properties, ["pk", "id"]);
		assert_eq!(article.managers.first().map(|m| m.name.as_str()), Some("objects"));
	}
}
