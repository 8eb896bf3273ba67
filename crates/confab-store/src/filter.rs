use confab_types::{FieldValue, Record};

/// Predicate language of the store contract: field equality plus boolean
/// combinations, evaluated against [`Record::field`]. Deliberately small —
/// it is the intersection of what the engine needs and what any realtime
/// row-store backend can index.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Matches every record of the queried kind.
    All,
    /// Field equals value. A field the kind does not carry never matches.
    Eq(&'static str, FieldValue),
    /// Every part matches. Empty input matches everything.
    And(Vec<Filter>),
    /// At least one part matches. Empty input matches nothing.
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &'static str, value: impl Into<FieldValue>) -> Self {
        Self::Eq(field, value.into())
    }

    /// `self AND other`, flattening nested conjunctions.
    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::And(mut parts) => {
                parts.push(other);
                Self::And(parts)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// `self OR other`, flattening nested disjunctions.
    pub fn or(self, other: Filter) -> Self {
        match self {
            Self::Or(mut parts) => {
                parts.push(other);
                Self::Or(parts)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    /// OR across a whole set, e.g. "id is one of these".
    pub fn any_of(parts: Vec<Filter>) -> Self {
        Self::Or(parts)
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::All => true,
            Self::Eq(field, value) => record.field(field).as_ref() == Some(value),
            Self::And(parts) => parts.iter().all(|f| f.matches(record)),
            Self::Or(parts) => parts.iter().any(|f| f.matches(record)),
        }
    }
}
