//! Static tables describing the framework surface: field constructors and
//! their lookup operators, queryset operations, and the default members every
//! model carries.

use phf::{phf_map, phf_set};

/// Declared type of the synthetic field a reverse relation installs on its target.
pub const REVERSE_COLLECTION: &str = "reverse-collection";

/// Name of the manager every model has, declared or not.
pub const DEFAULT_MANAGER: &str = "objects";

pub static RELATIONAL_TYPES: phf::Set<&str> = phf_set! {
	"ForeignKey",
	"OneToOneField",
	"ManyToManyField",
};

/// Bases that only mark a class as a model and carry no members worth merging.
pub static FRAMEWORK_BASES: phf::Set<&str> = phf_set! {
	"models.Model",
	"Model",
	"django.db.models.Model",
	"object",
};

/// Member names supplied by [DEFAULT_METHODS] and friends; never recorded from source.
pub static LIFECYCLE_METHODS: phf::Set<&str> = phf_set! {
	"save",
	"delete",
	"clean",
	"full_clean",
	"get_absolute_url",
};

/// Variable-name endings that almost always hold a manager or queryset.
pub const MANAGER_SUFFIXES: &[&str] = &["_set", "_qs", "_queryset", "_manager", "objects"];

/// Method-name prefixes and suffixes that, by convention, return a collection rather than one record.
pub const COLLECTION_PREFIXES: &[&str] = &["filter", "all", "list_", "search", "get_all"];
pub const COLLECTION_SUFFIXES: &[&str] = &["_list", "_set", "_qs", "_queryset"];

const COMMON_LOOKUPS: &[&str] = &[
	"exact",
	"iexact",
	"contains",
	"icontains",
	"in",
	"gt",
	"gte",
	"lt",
	"lte",
	"isnull",
];
const TEXT_LOOKUPS: &[&str] = &["startswith", "istartswith", "endswith", "iendswith", "regex", "iregex"];
const NUMERIC_LOOKUPS: &[&str] = &["range"];
const DATE_LOOKUPS: &[&str] = &["year", "month", "day", "week", "week_day", "quarter", "range"];
const DATETIME_LOOKUPS: &[&str] = &[
	"year", "month", "day", "week", "week_day", "quarter", "hour", "minute", "second", "range", "date", "time",
];
const TIME_LOOKUPS: &[&str] = &["hour", "minute", "second", "range"];
const JSON_LOOKUPS: &[&str] = &["has_key", "has_keys", "has_any_keys", "contained_by", "contains"];
const TO_ONE_LOOKUPS: &[&str] = &["exact", "in", "isnull"];
const TO_MANY_LOOKUPS: &[&str] = &["exact", "in"];

/// Which lookup operators a declared type supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupFamily {
	Plain,
	Text,
	Numeric,
	Date,
	DateTime,
	Time,
	Duration,
	Json,
	ToOne,
	ToMany,
	Reverse,
}

impl LookupFamily {
	fn tables(self) -> (&'static [&'static str], &'static [&'static str]) {
		match self {
			LookupFamily::Plain => (COMMON_LOOKUPS, &[]),
			LookupFamily::Text => (COMMON_LOOKUPS, TEXT_LOOKUPS),
			LookupFamily::Numeric | LookupFamily::Duration => (COMMON_LOOKUPS, NUMERIC_LOOKUPS),
			LookupFamily::Date => (COMMON_LOOKUPS, DATE_LOOKUPS),
			LookupFamily::DateTime => (COMMON_LOOKUPS, DATETIME_LOOKUPS),
			LookupFamily::Time => (COMMON_LOOKUPS, TIME_LOOKUPS),
			LookupFamily::Json => (COMMON_LOOKUPS, JSON_LOOKUPS),
			LookupFamily::ToOne | LookupFamily::Reverse => (TO_ONE_LOOKUPS, &[]),
			LookupFamily::ToMany => (TO_MANY_LOOKUPS, &[]),
		}
	}
}

#[derive(Debug)]
pub struct FieldType {
	pub family: LookupFamily,
	pub description: &'static str,
}

macro_rules! field_type {
	($family:ident, $desc:literal) => {
		FieldType {
			family: LookupFamily::$family,
			description: $desc,
		}
	};
}

/// Known field constructors. Unknown types are still valid fields, they simply get the common lookups.
pub static FIELD_TYPES: phf::Map<&str, FieldType> = phf_map! {
	"CharField" => field_type!(Text, "A string field, for small- to large-sized strings"),
	"TextField" => field_type!(Text, "A large text field"),
	"SlugField" => field_type!(Text, "A CharField that validates against letters, numbers, underscores, and hyphens"),
	"EmailField" => field_type!(Text, "A CharField that checks that the value is a valid email address"),
	"URLField" => field_type!(Text, "A CharField for a URL"),
	"FilePathField" => field_type!(Text, "A CharField whose choices are limited to the filenames in a certain directory"),
	"GenericIPAddressField" => field_type!(Text, "An IPv4 or IPv6 address"),
	"IntegerField" => field_type!(Numeric, "An integer field"),
	"BigIntegerField" => field_type!(Numeric, "A 64-bit integer field"),
	"SmallIntegerField" => field_type!(Numeric, "A small integer field"),
	"PositiveIntegerField" => field_type!(Numeric, "An integer field that must be positive"),
	"PositiveSmallIntegerField" => field_type!(Numeric, "A small integer field that must be positive"),
	"PositiveBigIntegerField" => field_type!(Numeric, "A 64-bit integer field that must be positive"),
	"AutoField" => field_type!(Numeric, "An IntegerField that automatically increments"),
	"BigAutoField" => field_type!(Numeric, "A 64-bit AutoField"),
	"FloatField" => field_type!(Numeric, "A floating-point number represented in Python by a float instance"),
	"DecimalField" => field_type!(Numeric, "A fixed-precision decimal number"),
	"BooleanField" => field_type!(Plain, "A true/false field"),
	"NullBooleanField" => field_type!(Plain, "A field that allows NULL, True, and False values"),
	"DateField" => field_type!(Date, "A date, represented in Python by a datetime.date instance"),
	"DateTimeField" => field_type!(DateTime, "A date and time, represented in Python by a datetime.datetime instance"),
	"TimeField" => field_type!(Time, "A time, represented in Python by a datetime.time instance"),
	"DurationField" => field_type!(Duration, "A field for storing periods of time"),
	"ForeignKey" => field_type!(ToOne, "A many-to-one relationship"),
	"OneToOneField" => field_type!(ToOne, "A one-to-one relationship"),
	"ManyToManyField" => field_type!(ToMany, "A many-to-many relationship"),
	"FileField" => field_type!(Plain, "A file-upload field"),
	"ImageField" => field_type!(Plain, "An image file field"),
	"JSONField" => field_type!(Json, "A field for storing JSON encoded data"),
	"UUIDField" => field_type!(Plain, "A field for storing universally unique identifiers"),
	"BinaryField" => field_type!(Plain, "A field to store raw binary data"),
	"reverse-collection" => field_type!(Reverse, "Objects of another model pointing at this one"),
};

pub fn lookup_family(declared_type: &str) -> LookupFamily {
	FIELD_TYPES
		.get(declared_type)
		.map(|ty| ty.family)
		.unwrap_or(LookupFamily::Plain)
}

/// The lookup operators applicable to `declared_type`, deduplicated, baseline first.
pub fn lookup_operators(declared_type: &str) -> Vec<&'static str> {
	let (base, extra) = lookup_family(declared_type).tables();
	let mut out = Vec::with_capacity(base.len() + extra.len());
	for op in base.iter().chain(extra) {
		if !out.contains(op) {
			out.push(*op);
		}
	}
	out
}

#[inline]
pub fn is_relational(declared_type: &str) -> bool {
	RELATIONAL_TYPES.contains(declared_type)
}

/// How a queryset operation hands back its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Returns {
	/// Another queryset; further chaining is possible.
	QuerySet,
	/// A single record.
	Instance,
	/// Anything else: counts, tuples, dictionaries, iterators.
	Scalar,
}

#[derive(Debug)]
pub struct QuerySetOp {
	pub name: &'static str,
	pub signature: &'static str,
	pub doc: &'static str,
	pub returns: Returns,
}

macro_rules! op {
	($name:literal, $sig:literal, $ret:ident, $doc:literal) => {
		QuerySetOp {
			name: $name,
			signature: $sig,
			doc: $doc,
			returns: Returns::$ret,
		}
	};
}

/// The default surface of every manager and queryset, in completion order.
pub const QUERYSET_OPS: &[QuerySetOp] = &[
	op!("all", "() -> QuerySet", QuerySet, "Returns a copy of the current QuerySet"),
	op!("filter", "(**kwargs) -> QuerySet", QuerySet, "Returns a new QuerySet containing objects that match the given lookup parameters"),
	op!("exclude", "(**kwargs) -> QuerySet", QuerySet, "Returns a new QuerySet containing objects that do not match the given lookup parameters"),
	op!("annotate", "(**kwargs) -> QuerySet", QuerySet, "Returns a QuerySet where each object has been annotated with the specified values"),
	op!("order_by", "(*fields) -> QuerySet", QuerySet, "Returns a QuerySet ordered by the given fields"),
	op!("reverse", "() -> QuerySet", QuerySet, "Reverses the ordering of the QuerySet"),
	op!("distinct", "(*fields) -> QuerySet", QuerySet, "Returns a new QuerySet that uses SELECT DISTINCT"),
	op!("values", "(*fields) -> QuerySet", QuerySet, "Returns a QuerySet that returns dictionaries when used as an iterable"),
	op!("values_list", "(*fields, flat=False, named=False) -> QuerySet", QuerySet, "Returns a QuerySet that returns tuples when used as an iterable"),
	op!("dates", "(field, kind, order=\"ASC\") -> QuerySet", QuerySet, "Returns a QuerySet that evaluates to a list of datetime.date objects"),
	op!("datetimes", "(field, kind, order=\"ASC\", tzinfo=None) -> QuerySet", QuerySet, "Returns a QuerySet that evaluates to a list of datetime.datetime objects"),
	op!("none", "() -> QuerySet", QuerySet, "Returns an empty QuerySet"),
	op!("union", "(*other_qs, all=False) -> QuerySet", QuerySet, "Uses SQL's UNION operator to combine the results of two or more QuerySets"),
	op!("intersection", "(*other_qs) -> QuerySet", QuerySet, "Uses SQL's INTERSECT operator to return the shared elements of two or more QuerySets"),
	op!("difference", "(*other_qs) -> QuerySet", QuerySet, "Uses SQL's EXCEPT operator to keep only elements present in the QuerySet but not in some other QuerySets"),
	op!("select_related", "(*fields) -> QuerySet", QuerySet, "Returns a QuerySet that will follow foreign-key relationships"),
	op!("prefetch_related", "(*lookups) -> QuerySet", QuerySet, "Returns a QuerySet that will automatically retrieve related objects"),
	op!("extra", "(select=None, where=None, params=None, tables=None, order_by=None, select_params=None) -> QuerySet", QuerySet, "Adds raw SQL fragments to the generated query"),
	op!("defer", "(*fields) -> QuerySet", QuerySet, "Tells Django not to retrieve specific fields from the database"),
	op!("only", "(*fields) -> QuerySet", QuerySet, "The opposite of defer(): only the specified fields are loaded immediately"),
	op!("using", "(alias) -> QuerySet", QuerySet, "Specifies which database the QuerySet should be evaluated against"),
	op!("select_for_update", "(nowait=False, skip_locked=False, of=()) -> QuerySet", QuerySet, "Returns a queryset that will lock rows until the end of the transaction"),
	op!("raw", "(raw_query, params=None, translations=None, using=None) -> RawQuerySet", Scalar, "Performs a raw SQL query and returns a RawQuerySet instance"),
	op!("get", "(**kwargs) -> Model", Instance, "Returns the object matching the given lookup parameters"),
	op!("first", "() -> Model | None", Instance, "Returns the first object matched by the queryset"),
	op!("last", "() -> Model | None", Instance, "Returns the last object matched by the queryset"),
	op!("latest", "(*fields) -> Model", Instance, "Returns the latest object in the table based on the given field(s)"),
	op!("earliest", "(*fields) -> Model", Instance, "Returns the earliest object in the table based on the given field(s)"),
	op!("exists", "() -> bool", Scalar, "Returns True if the QuerySet contains any results"),
	op!("count", "() -> int", Scalar, "Returns an integer representing the number of objects in the QuerySet"),
	op!("aggregate", "(**kwargs) -> dict", Scalar, "Returns a dictionary of aggregate values calculated over the QuerySet"),
	op!("get_or_create", "(defaults=None, **kwargs) -> (Model, bool)", Scalar, "Returns a tuple of (object, created)"),
	op!("update_or_create", "(defaults=None, **kwargs) -> (Model, bool)", Scalar, "Updates an object with the given kwargs, creating a new one if necessary"),
	op!("bulk_create", "(objs, batch_size=None, ignore_conflicts=False) -> list", Scalar, "Inserts the provided list of objects into the database"),
	op!("bulk_update", "(objs, fields, batch_size=None) -> None", Scalar, "Updates the given fields on the provided model instances"),
	op!("in_bulk", "(id_list=None, *, field_name=\"pk\") -> dict", Scalar, "Returns a dictionary mapping the values of field_name to model instances"),
	op!("iterator", "(chunk_size=2000) -> Iterator", Scalar, "Evaluates the QuerySet and returns an iterator over the results"),
	op!("explain", "(*, format=None, **options) -> str", Scalar, "Returns the execution plan of the QuerySet's query"),
	op!("delete", "() -> (int, dict)", Scalar, "Deletes the objects in the current QuerySet"),
	op!("update", "(**kwargs) -> int", Scalar, "Updates all objects in the QuerySet"),
	op!("create", "(**kwargs) -> Model", Instance, "Creates an object and saves it all in one step"),
];

/// Operations a reverse manager has on top of [QUERYSET_OPS].
pub const RELATED_MANAGER_OPS: &[QuerySetOp] = &[
	op!("create", "(**kwargs) -> Model", Instance, "Creates a related object, saves it and links it to the owner"),
	op!("add", "(*objs, bulk=True)", Scalar, "Links the given objects to the owner"),
	op!("remove", "(*objs, bulk=True)", Scalar, "Unlinks the given objects from the owner"),
	op!("clear", "(bulk=True)", Scalar, "Unlinks every related object from the owner"),
	op!("set", "(objs, bulk=True, clear=False)", Scalar, "Replaces the set of related objects"),
];

pub fn queryset_op(name: &str) -> Option<&'static QuerySetOp> {
	QUERYSET_OPS.iter().find(|op| op.name == name)
}

/// Query-construction calls whose argument list takes field lookups.
pub static FILTER_CALLS: phf::Set<&str> = phf_set! {
	"filter",
	"exclude",
	"get",
	"annotate",
	"aggregate",
	"get_or_create",
	"update_or_create",
};

pub struct DefaultMethod {
	pub name: &'static str,
	pub params: &'static [&'static str],
	pub doc: &'static str,
}

/// Instance methods every model has.
pub const DEFAULT_METHODS: &[DefaultMethod] = &[
	DefaultMethod {
		name: "save",
		params: &["force_insert=False", "force_update=False", "using=DEFAULT_DB_ALIAS", "update_fields=None"],
		doc: "Saves the current instance",
	},
	DefaultMethod {
		name: "delete",
		params: &["using=DEFAULT_DB_ALIAS", "keep_parents=False"],
		doc: "Deletes the current instance",
	},
	DefaultMethod {
		name: "get_absolute_url",
		params: &[],
		doc: "Returns the canonical URL for the object",
	},
	DefaultMethod {
		name: "clean",
		params: &[],
		doc: "Hook for custom model validation",
	},
	DefaultMethod {
		name: "full_clean",
		params: &["exclude=None", "validate_unique=True"],
		doc: "Calls clean_fields(), clean(), and validate_unique() on the model",
	},
];

/// Property names every model has.
pub const DEFAULT_PROPERTIES: &[&str] = &["pk", "id"];
