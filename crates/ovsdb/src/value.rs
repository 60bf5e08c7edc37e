use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

/// `Atom` holds one typed OVSDB scalar.
///
/// UUIDs carry two wire encodings: `["uuid", "<hex>"]` for a concrete row id,
/// and `["named-uuid", "<token>"]` for a forward reference within a pending
/// transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    String(String),
    Uuid(uuid::Uuid),
    NamedUuid(String),
}

impl Atom {
    /// Name of this atom's concrete kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Atom::Integer(_) => "integer",
            Atom::Real(_) => "real",
            Atom::Boolean(_) => "boolean",
            Atom::String(_) => "string",
            Atom::Uuid(_) | Atom::NamedUuid(_) => "uuid",
        }
    }

    /// Wire encoding of this atom.
    pub fn to_json(&self) -> Value {
        match self {
            Atom::Integer(n) => json!(n),
            Atom::Real(n) => json!(n),
            Atom::Boolean(b) => json!(b),
            Atom::String(s) => json!(s),
            Atom::Uuid(u) => json!(["uuid", u.to_string()]),
            Atom::NamedUuid(token) => json!(["named-uuid", token]),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Atom::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<uuid::Uuid> {
        match self {
            Atom::Uuid(u) => Some(*u),
            _ => None,
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Integer(n) => write!(f, "{}", n),
            Atom::Real(n) => write!(f, "{}", n),
            Atom::Boolean(b) => write!(f, "{}", b),
            Atom::String(s) => write!(f, "{}", s),
            Atom::Uuid(u) => write!(f, "{}", u),
            Atom::NamedUuid(token) => write!(f, "{}", token),
        }
    }
}

impl From<i64> for Atom {
    fn from(n: i64) -> Self {
        Atom::Integer(n)
    }
}
impl From<f64> for Atom {
    fn from(n: f64) -> Self {
        Atom::Real(n)
    }
}
impl From<bool> for Atom {
    fn from(b: bool) -> Self {
        Atom::Boolean(b)
    }
}
impl From<&str> for Atom {
    fn from(s: &str) -> Self {
        Atom::String(s.to_string())
    }
}
impl From<String> for Atom {
    fn from(s: String) -> Self {
        Atom::String(s)
    }
}
impl From<uuid::Uuid> for Atom {
    fn from(u: uuid::Uuid) -> Self {
        Atom::Uuid(u)
    }
}

/// `Datum` is a decoded column value: a scalar, an ordered set,
/// or an ordered key/value map, per the column's multiplicity.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Atom(Atom),
    Set(Vec<Atom>),
    Map(Vec<(Atom, Atom)>),
}

impl Datum {
    /// Empty set, the nil-equivalent of a multi-valued column.
    pub fn empty_set() -> Self {
        Datum::Set(Vec::new())
    }

    /// Empty map, the nil-equivalent of a key-valued column.
    pub fn empty_map() -> Self {
        Datum::Map(Vec::new())
    }

    pub fn as_atom(&self) -> Option<&Atom> {
        match self {
            Datum::Atom(atom) => Some(atom),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&[Atom]> {
        match self {
            Datum::Set(atoms) => Some(atoms),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Atom, Atom)]> {
        match self {
            Datum::Map(pairs) => Some(pairs),
            _ => None,
        }
    }

    /// Number of contained elements (one for a scalar).
    pub fn len(&self) -> usize {
        match self {
            Datum::Atom(_) => 1,
            Datum::Set(atoms) => atoms.len(),
            Datum::Map(pairs) => pairs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wire encoding: scalars bare, sets as `["set", [...]]`,
    /// maps as `["map", [[k, v], ...]]`.
    pub fn to_json(&self) -> Value {
        match self {
            Datum::Atom(atom) => atom.to_json(),
            Datum::Set(atoms) => {
                json!(["set", atoms.iter().map(Atom::to_json).collect::<Vec<_>>()])
            }
            Datum::Map(pairs) => json!([
                "map",
                pairs
                    .iter()
                    .map(|(k, v)| json!([k.to_json(), v.to_json()]))
                    .collect::<Vec<_>>()
            ]),
        }
    }
}

impl From<Atom> for Datum {
    fn from(atom: Atom) -> Self {
        Datum::Atom(atom)
    }
}

impl FromIterator<Atom> for Datum {
    fn from_iter<T: IntoIterator<Item = Atom>>(iter: T) -> Self {
        Datum::Set(iter.into_iter().collect())
    }
}

/// `Row` is an ordered mapping from column name to decoded value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: BTreeMap<String, Datum>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Datum>) -> &mut Self {
        self.columns.insert(column.into(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Datum> {
        self.columns.get(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Datum)> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// The row's `_uuid` column, if it was decoded.
    pub fn uuid(&self) -> Option<uuid::Uuid> {
        self.get("_uuid").and_then(Datum::as_atom).and_then(Atom::as_uuid)
    }

    /// Wire encoding of the row, suitable for insert and update operations.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.columns
                .iter()
                .map(|(name, datum)| (name.clone(), datum.to_json()))
                .collect(),
        )
    }
}

impl FromIterator<(String, Datum)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, Datum)>>(iter: T) -> Self {
        Row {
            columns: iter.into_iter().collect(),
        }
    }
}
