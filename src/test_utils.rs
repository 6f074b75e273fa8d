//! Fixtures shared by the scenario suites.

use crate::index::Index;

pub const LIBRARY_PATH: &str = "library/models.py";

pub const LIBRARY: &str = r#"from django.db import models


class PublishedManager(models.Manager):
    def published(self):
        return self.filter(is_published=True)

    def by_author(self, author):
        return self.filter(author=author)


class Author(models.Model):
    name = models.CharField(max_length=100)
    email = models.EmailField(blank=True)
    birth_date = models.DateField(null=True)

    def __str__(self):
        return self.name

    @property
    def display_name(self):
        return self.name.title()


class Book(models.Model):
    title = models.CharField(max_length=200, help_text="Full title")
    author = models.ForeignKey(Author, on_delete=models.CASCADE)
    pages = models.IntegerField(default=0)
    tags = models.ManyToManyField('Tag', related_name='books', blank=True)
    is_published = models.BooleanField(default=False)

    objects = models.Manager()
    catalog = PublishedManager()

    def summary(self, length=100):
        return self.title[:length]

    def is_long(self):
        return self.pages > 500


class Tag(models.Model):
    label = models.CharField(max_length=30)
"#;

/// An index holding [LIBRARY].
pub fn library_index() -> Index {
	crate::utils::init_for_test();
	let mut index = Index::default();
	index.analyze_unit(LIBRARY, LIBRARY_PATH);
	index
}
