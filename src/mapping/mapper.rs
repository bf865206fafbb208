use super::field::StructField;

/// Column flags parsed from a field tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FieldFlags {
    pub primary_key: bool,
    pub read_only: bool,
    pub has_default: bool,
}

/// Result of mapping a single field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMapping {
    /// Table named by a `primarykey=<table>` flag.
    pub table: Option<String>,
    pub column: Option<String>,
    pub flags: FieldFlags,
    pub used: bool,
}

impl FieldMapping {
    fn unused() -> Self {
        Self::default()
    }
}

/// Decides whether a field participates in a mapping, and as which column.
pub trait FieldMapper: Send + Sync {
    fn map_field(&self, field: &StructField) -> FieldMapping;

    /// Distinguishes mappers in the struct mapping cache. Two mappers with the
    /// same key must map every field identically.
    fn cache_key(&self) -> String;
}

/// How fields without a tag are named.
#[derive(Debug, Clone, Copy, Default)]
pub enum UntaggedNamePolicy {
    /// Untagged fields do not participate.
    #[default]
    Ignore,
    /// The Rust field name is the column name.
    Identity,
    /// The field name converted with [`snake_case`].
    SnakeCase,
    /// A caller-supplied conversion; `name` keys the cache.
    Custom {
        name: &'static str,
        convert: fn(&str) -> String,
    },
}

impl UntaggedNamePolicy {
    fn column_for(&self, field_name: &str) -> Option<String> {
        match self {
            UntaggedNamePolicy::Ignore => None,
            UntaggedNamePolicy::Identity => Some(field_name.to_string()),
            UntaggedNamePolicy::SnakeCase => Some(snake_case(field_name)),
            UntaggedNamePolicy::Custom { convert, .. } => Some(convert(field_name)),
        }
    }

    fn key(&self) -> &'static str {
        match self {
            UntaggedNamePolicy::Ignore => "ignore",
            UntaggedNamePolicy::Identity => "identity",
            UntaggedNamePolicy::SnakeCase => "snake_case",
            UntaggedNamePolicy::Custom { name, .. } => *name,
        }
    }
}

/// The built-in mapper: reads `<column>[,<flag>[=<arg>]]*` from a tag key.
#[derive(Debug, Clone)]
pub struct TaggedFieldMapper {
    pub tag_key: &'static str,
    pub ignore_marker: &'static str,
    pub untagged: UntaggedNamePolicy,
}

impl Default for TaggedFieldMapper {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TaggedFieldMapper {
    /// `db` tags, `-` to ignore, untagged fields skipped.
    pub const DEFAULT: Self = Self {
        tag_key: "db",
        ignore_marker: "-",
        untagged: UntaggedNamePolicy::Ignore,
    };

    #[must_use]
    pub fn new(tag_key: &'static str) -> Self {
        Self {
            tag_key,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_untagged(mut self, policy: UntaggedNamePolicy) -> Self {
        self.untagged = policy;
        self
    }

    #[must_use]
    pub fn with_ignore_marker(mut self, marker: &'static str) -> Self {
        self.ignore_marker = marker;
        self
    }

    fn parse_tag(&self, tag: &str) -> FieldMapping {
        let mut segments = tag.split(',');
        let column = segments.next().unwrap_or_default().trim();
        if column.is_empty() || column == self.ignore_marker {
            return FieldMapping::unused();
        }
        let mut mapping = FieldMapping {
            column: Some(column.to_string()),
            used: true,
            ..FieldMapping::default()
        };
        for segment in segments {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let (flag, arg) = match segment.split_once('=') {
                Some((flag, arg)) => (flag.trim(), Some(arg.trim())),
                None => (segment, None),
            };
            match flag.to_ascii_lowercase().as_str() {
                "primarykey" | "primary_key" | "pk" => {
                    mapping.flags.primary_key = true;
                    if let Some(table) = arg.filter(|t| !t.is_empty()) {
                        mapping.table = Some(table.to_string());
                    }
                }
                "readonly" | "read_only" => mapping.flags.read_only = true,
                "default" | "hasdefault" | "has_default" => mapping.flags.has_default = true,
                _ => {}
            }
        }
        mapping
    }
}

impl FieldMapper for TaggedFieldMapper {
    fn map_field(&self, field: &StructField) -> FieldMapping {
        let tag = field.tag(self.tag_key);
        if field.embedded.is_some() {
            return match tag {
                Some(tag) => {
                    let name = tag.split(',').next().unwrap_or_default().trim();
                    if name == self.ignore_marker {
                        FieldMapping::unused()
                    } else if name.is_empty() {
                        FieldMapping {
                            used: true,
                            ..FieldMapping::default()
                        }
                    } else {
                        self.parse_tag(tag)
                    }
                }
                None => FieldMapping {
                    used: true,
                    ..FieldMapping::default()
                },
            };
        }
        if !field.exported {
            return FieldMapping::unused();
        }
        match tag {
            Some(tag) => self.parse_tag(tag),
            None => match self.untagged.column_for(field.name) {
                Some(column) => FieldMapping {
                    column: Some(column),
                    used: true,
                    ..FieldMapping::default()
                },
                None => FieldMapping::unused(),
            },
        }
    }

    fn cache_key(&self) -> String {
        format!(
            "tag={};ignore={};untagged={}",
            self.tag_key,
            self.ignore_marker,
            self.untagged.key()
        )
    }
}

/// Lowercase `name`, inserting `_` before each uppercase letter that follows a
/// non-uppercase one. Runs of capitals stay together.
///
/// ```rust
/// use sqldb::mapping::snake_case;
///
/// assert_eq!(snake_case("DocumentID"), "document_id");
/// assert_eq!(snake_case("HTMLHandler"), "htmlhandler");
/// ```
#[must_use]
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev: Option<char> = None;
    for c in name.chars() {
        if c.is_uppercase() {
            if let Some(p) = prev
                && !p.is_uppercase()
                && p != '_'
            {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
        prev = Some(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &'static str, tags: &'static [(&'static str, &'static str)]) -> StructField {
        StructField {
            name,
            tags,
            exported: true,
            embedded: None,
        }
    }

    #[test]
    fn snake_case_examples() {
        assert_eq!(snake_case("ID"), "id");
        assert_eq!(snake_case("StrPtr"), "str_ptr");
        assert_eq!(snake_case("UntaggedField"), "untagged_field");
        assert_eq!(snake_case("CreatedAt"), "created_at");
        assert_eq!(snake_case("DocumentID"), "document_id");
        assert_eq!(snake_case("HTMLHandler"), "htmlhandler");
        assert_eq!(snake_case("already_snake"), "already_snake");
        assert_eq!(snake_case("Has_Underscore"), "has_underscore");
    }

    #[test]
    fn parses_flags_case_insensitively() {
        let mapper = TaggedFieldMapper::default();
        let mapping = mapper.map_field(&field(
            "id",
            &[("db", "id, PrimaryKey=public.users,readOnly,,unknown=3,hasDefault")],
        ));
        assert!(mapping.used);
        assert_eq!(mapping.column.as_deref(), Some("id"));
        assert_eq!(mapping.table.as_deref(), Some("public.users"));
        assert_eq!(
            mapping.flags,
            FieldFlags {
                primary_key: true,
                read_only: true,
                has_default: true,
            }
        );
    }

    #[test]
    fn ignore_marker_and_empty_name_skip() {
        let mapper = TaggedFieldMapper::default();
        assert!(!mapper.map_field(&field("a", &[("db", "-")])).used);
        assert!(!mapper.map_field(&field("a", &[("db", ",pk")])).used);
    }

    #[test]
    fn untagged_policies() {
        let untagged = field("UntaggedField", &[]);
        assert!(!TaggedFieldMapper::default().map_field(&untagged).used);

        let identity = TaggedFieldMapper::default().with_untagged(UntaggedNamePolicy::Identity);
        assert_eq!(
            identity.map_field(&untagged).column.as_deref(),
            Some("UntaggedField")
        );

        let custom = TaggedFieldMapper::default().with_untagged(UntaggedNamePolicy::Custom {
            name: "upper",
            convert: |s| s.to_uppercase(),
        });
        assert_eq!(
            custom.map_field(&untagged).column.as_deref(),
            Some("UNTAGGEDFIELD")
        );
        assert_ne!(custom.cache_key(), identity.cache_key());
    }

    #[test]
    fn private_fields_are_unused() {
        let mut private = field("secret", &[("db", "secret")]);
        private.exported = false;
        assert!(!TaggedFieldMapper::default().map_field(&private).used);
    }

    #[test]
    fn other_tag_keys() {
        let mapper = TaggedFieldMapper::new("sql");
        let f = field("name", &[("db", "db_name"), ("sql", "sql_name")]);
        assert_eq!(mapper.map_field(&f).column.as_deref(), Some("sql_name"));
    }
}
