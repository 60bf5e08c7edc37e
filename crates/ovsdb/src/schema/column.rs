use crate::{Atom, Datum, Error, Result};
use itertools::Itertools;
use serde_json::{Map, Value};

/// Upper bound stood in for a textual `"max": "unlimited"`.
pub const UNLIMITED: u64 = i64::MAX as u64;

/// Referential semantics of a UUID column (RFC 7047 §3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefType {
    Strong,
    Weak,
}

/// `BaseType` is one OVSDB atomic type together with its constraints.
#[derive(Debug, Clone, PartialEq)]
pub enum BaseType {
    Integer {
        min: Option<i64>,
        max: Option<i64>,
        choices: Option<Vec<i64>>,
    },
    Real {
        min: Option<f64>,
        max: Option<f64>,
        choices: Option<Vec<f64>>,
    },
    Boolean,
    String {
        min_length: Option<u64>,
        max_length: Option<u64>,
        choices: Option<Vec<String>>,
    },
    Uuid {
        ref_table: Option<String>,
        ref_type: RefType,
    },
}

impl BaseType {
    /// Unconstrained integer type.
    pub fn integer() -> Self {
        BaseType::Integer {
            min: None,
            max: None,
            choices: None,
        }
    }

    /// Unconstrained real type.
    pub fn real() -> Self {
        BaseType::Real {
            min: None,
            max: None,
            choices: None,
        }
    }

    /// Unconstrained string type.
    pub fn string() -> Self {
        BaseType::String {
            min_length: None,
            max_length: None,
            choices: None,
        }
    }

    /// UUID type without a reference table.
    pub fn uuid() -> Self {
        BaseType::Uuid {
            ref_table: None,
            ref_type: RefType::Strong,
        }
    }

    /// Name of this type, as it appears in schema documents.
    pub fn kind(&self) -> &'static str {
        match self {
            BaseType::Integer { .. } => "integer",
            BaseType::Real { .. } => "real",
            BaseType::Boolean => "boolean",
            BaseType::String { .. } => "string",
            BaseType::Uuid { .. } => "uuid",
        }
    }

    /// Parse the `field` property ("key" or "value") of a column type object.
    /// The property may be a bare type name, an object with a "type" and
    /// constraints, or absent, which yields None.
    pub fn from_json(parent: &Value, field: &str) -> Result<Option<Self>> {
        let Some(node) = parent.get(field) else {
            return Ok(None);
        };
        match node {
            Value::String(name) => Ok(Some(Self::named(name)?)),
            Value::Object(obj) => {
                let Some(name) = obj.get("type").and_then(Value::as_str) else {
                    return Err(Error::Parsing(format!(
                        "base type object lacks a \"type\" member: {node}"
                    )));
                };
                let mut base = Self::named(name)?;
                base.apply_constraints(obj)?;
                Ok(Some(base))
            }
            _ => Err(Error::Parsing(format!(
                "expected a type name or base type object for \"{field}\": {node}"
            ))),
        }
    }

    fn named(name: &str) -> Result<Self> {
        match name {
            "integer" => Ok(Self::integer()),
            "real" => Ok(Self::real()),
            "boolean" => Ok(BaseType::Boolean),
            "string" => Ok(Self::string()),
            "uuid" => Ok(Self::uuid()),
            other => Err(Error::Parsing(format!("unknown atomic type \"{other}\""))),
        }
    }

    fn apply_constraints(&mut self, obj: &Map<String, Value>) -> Result<()> {
        match self {
            BaseType::Integer { min, max, choices } => {
                *min = obj.get("minInteger").and_then(Value::as_i64);
                *max = obj.get("maxInteger").and_then(Value::as_i64);
                *choices = parse_choices(obj, |atom| match atom {
                    Atom::Integer(n) => Some(n),
                    _ => None,
                })?;
            }
            BaseType::Real { min, max, choices } => {
                *min = obj.get("minReal").and_then(Value::as_f64);
                *max = obj.get("maxReal").and_then(Value::as_f64);
                *choices = parse_choices(obj, |atom| match atom {
                    Atom::Real(n) => Some(n),
                    Atom::Integer(n) => Some(n as f64),
                    _ => None,
                })?;
            }
            BaseType::Boolean => (),
            BaseType::String {
                min_length,
                max_length,
                choices,
            } => {
                *min_length = obj.get("minLength").and_then(Value::as_u64);
                *max_length = obj.get("maxLength").and_then(Value::as_u64);
                *choices = parse_choices(obj, |atom| match atom {
                    Atom::String(s) => Some(s),
                    _ => None,
                })?;
            }
            BaseType::Uuid {
                ref_table,
                ref_type,
            } => {
                *ref_table = obj
                    .get("refTable")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                *ref_type = match obj.get("refType").and_then(Value::as_str) {
                    None | Some("strong") => RefType::Strong,
                    Some("weak") => RefType::Weak,
                    Some(other) => {
                        return Err(Error::Parsing(format!("unknown refType \"{other}\"")))
                    }
                };
            }
        }
        Ok(())
    }

    /// Convert a wire scalar into a typed atom of this kind.
    /// Kind mismatches raise `TypeMismatch`; constraints are checked by
    /// `validate`.
    pub fn to_atom(&self, json: &Value) -> Result<Atom> {
        match self {
            BaseType::Integer { .. } => json
                .as_i64()
                .map(Atom::Integer)
                .ok_or_else(|| Error::mismatch("integer", json)),
            BaseType::Real { .. } => json
                .as_f64()
                .map(Atom::Real)
                .ok_or_else(|| Error::mismatch("real", json)),
            BaseType::Boolean => json
                .as_bool()
                .map(Atom::Boolean)
                .ok_or_else(|| Error::mismatch("boolean", json)),
            BaseType::String { .. } => json
                .as_str()
                .map(|s| Atom::String(s.to_string()))
                .ok_or_else(|| Error::mismatch("string", json)),
            BaseType::Uuid { .. } => match tagged_pair(json) {
                Some(("uuid", id)) => uuid::Uuid::parse_str(id)
                    .map(Atom::Uuid)
                    .map_err(|_| Error::mismatch("uuid", json)),
                Some(("named-uuid", token)) => Ok(Atom::NamedUuid(token.to_string())),
                _ => Err(Error::mismatch("uuid", json)),
            },
        }
    }

    /// Check an atom against this type's kind and constraints.
    pub fn validate(&self, atom: &Atom) -> Result<()> {
        match (self, atom) {
            (BaseType::Integer { min, max, choices }, Atom::Integer(n)) => {
                if min.is_some_and(|min| *n < min) || max.is_some_and(|max| *n > max) {
                    return Err(Error::InvalidValue(format!(
                        "{n} is outside the declared integer range"
                    )));
                }
                check_choices(choices.as_deref(), n)
            }
            (BaseType::Real { min, max, choices }, Atom::Real(n)) => {
                if min.is_some_and(|min| *n < min) || max.is_some_and(|max| *n > max) {
                    return Err(Error::InvalidValue(format!(
                        "{n} is outside the declared real range"
                    )));
                }
                check_choices(choices.as_deref(), n)
            }
            (BaseType::Boolean, Atom::Boolean(_)) => Ok(()),
            (
                BaseType::String {
                    min_length,
                    max_length,
                    choices,
                },
                Atom::String(s),
            ) => {
                let length = s.chars().count() as u64;
                if min_length.is_some_and(|min| length < min)
                    || max_length.is_some_and(|max| length > max)
                {
                    return Err(Error::InvalidValue(format!(
                        "string length {length} is outside the declared bounds"
                    )));
                }
                check_choices(choices.as_deref(), s)
            }
            (BaseType::Uuid { .. }, Atom::Uuid(_) | Atom::NamedUuid(_)) => Ok(()),
            (base, atom) => Err(Error::TypeMismatch {
                expected: base.kind(),
                value: atom.to_json(),
            }),
        }
    }
}

fn check_choices<T: PartialEq + std::fmt::Display>(
    choices: Option<&[T]>,
    value: &T,
) -> Result<()> {
    match choices {
        Some(choices) if !choices.contains(value) => Err(Error::InvalidValue(format!(
            "{value} is not among the enumerated values {}",
            choices.iter().map(|c| c.to_string()).join(", ")
        ))),
        _ => Ok(()),
    }
}

// An "enum" constraint is itself an OVSDB value: either a bare scalar or a
// `["set", [...]]` of scalars of the constrained type.
fn parse_choices<T>(
    obj: &Map<String, Value>,
    extract: impl Fn(Atom) -> Option<T>,
) -> Result<Option<Vec<T>>> {
    let Some(node) = obj.get("enum") else {
        return Ok(None);
    };
    let elements: Vec<&Value> = match tagged_array(node, "set") {
        Some(elements) => elements.iter().collect(),
        None => vec![node],
    };
    let choices = elements
        .into_iter()
        .map(|element| {
            scalar_atom(element)
                .and_then(&extract)
                .ok_or_else(|| Error::Parsing(format!("unsupported enum member: {element}")))
        })
        .collect::<Result<Vec<T>>>()?;
    Ok(Some(choices))
}

fn scalar_atom(json: &Value) -> Option<Atom> {
    match json {
        Value::Bool(b) => Some(Atom::Boolean(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(Atom::Integer)
            .or_else(|| n.as_f64().map(Atom::Real)),
        Value::String(s) => Some(Atom::String(s.clone())),
        _ => None,
    }
}

fn tagged_pair(json: &Value) -> Option<(&str, &str)> {
    match json.as_array()?.as_slice() {
        [Value::String(tag), Value::String(body)] => Some((tag, body)),
        _ => None,
    }
}

fn tagged_array<'v>(json: &'v Value, tag: &str) -> Option<&'v [Value]> {
    match json.as_array()?.as_slice() {
        [Value::String(t), Value::Array(inner)] if t == tag => Some(inner),
        _ => None,
    }
}

/// `ColumnType` pairs a value type (and, for maps, a key type) with the
/// column's multiplicity bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnType {
    /// Key type of a key-valued column; None for atomic columns.
    pub key: Option<BaseType>,
    pub value: BaseType,
    pub min: u64,
    pub max: u64,
}

impl ColumnType {
    /// A scalar column of the given type.
    pub fn scalar(value: BaseType) -> Self {
        ColumnType {
            key: None,
            value,
            min: 1,
            max: 1,
        }
    }

    /// A set column of the given type and bounds.
    pub fn set(value: BaseType, min: u64, max: u64) -> Self {
        ColumnType {
            key: None,
            value,
            min,
            max,
        }
    }

    /// A map column with the given key and value types.
    pub fn map(key: BaseType, value: BaseType, min: u64, max: u64) -> Self {
        ColumnType {
            key: Some(key),
            value,
            min,
            max,
        }
    }

    pub fn is_map(&self) -> bool {
        self.key.is_some()
    }

    pub fn is_multi_valued(&self) -> bool {
        self.min != self.max
    }

    /// Parse a column "type" member: a bare scalar name, or an object whose
    /// "key"/"value" members select atomic versus key-valued shape.
    pub fn from_json(node: &Value) -> Result<Self> {
        match node {
            Value::String(name) => Ok(Self::scalar(BaseType::named(name)?)),
            Value::Object(obj) => {
                let (min, max) = parse_min_max(obj)?;
                // A "value" member makes the column key-valued; otherwise the
                // "key" member holds the atomic value type.
                match BaseType::from_json(node, "value")? {
                    Some(value) => {
                        let key = BaseType::from_json(node, "key")?
                            .ok_or_else(|| Error::UnknownColumnType(node.clone()))?;
                        Ok(ColumnType {
                            key: Some(key),
                            value,
                            min,
                            max,
                        })
                    }
                    None => {
                        let value = BaseType::from_json(node, "key")?
                            .ok_or_else(|| Error::UnknownColumnType(node.clone()))?;
                        Ok(ColumnType {
                            key: None,
                            value,
                            min,
                            max,
                        })
                    }
                }
            }
            _ => Err(Error::UnknownColumnType(node.clone())),
        }
    }

    /// Decode a wire value into a typed datum, honoring multiplicity:
    /// scalars bare, sets as `["set", [...]]` or the one-element shorthand,
    /// maps as `["map", [[k, v], ...]]`.
    pub fn value_from_json(&self, json: &Value) -> Result<Datum> {
        if let Some(key_type) = &self.key {
            let Some(pairs) = tagged_array(json, "map") else {
                return Err(Error::MalformedValue(json.clone()));
            };
            let mut map = Vec::with_capacity(pairs.len());
            for pair in pairs {
                let (k, v) = match pair.as_array().map(Vec::as_slice) {
                    Some([k, v]) => (k, v),
                    _ => return Err(Error::MalformedValue(pair.clone())),
                };
                let key = key_type.to_atom(k)?;
                key_type.validate(&key)?;
                let value = self.value.to_atom(v)?;
                self.value.validate(&value)?;
                map.push((key, value));
            }
            Ok(Datum::Map(map))
        } else if !self.is_multi_valued() {
            Ok(Datum::Atom(self.decode_atom(json)?))
        } else if let Some(elements) = tagged_array(json, "set") {
            elements
                .iter()
                .map(|element| self.decode_atom(element))
                .collect::<Result<Vec<Atom>>>()
                .map(Datum::Set)
        } else {
            // Legacy shorthand: a bare scalar denotes a one-element set.
            Ok(Datum::Set(vec![self.decode_atom(json)?]))
        }
    }

    fn decode_atom(&self, json: &Value) -> Result<Atom> {
        let atom = self.value.to_atom(json)?;
        self.value.validate(&atom)?;
        Ok(atom)
    }

    /// Check an already-built datum against this column's shape,
    /// element constraints, and multiplicity bounds.
    pub fn validate(&self, datum: &Datum) -> Result<()> {
        match (self.key.as_ref(), datum) {
            (Some(key_type), Datum::Map(pairs)) => {
                for (k, v) in pairs {
                    key_type.validate(k)?;
                    self.value.validate(v)?;
                }
            }
            (None, Datum::Atom(atom)) if !self.is_multi_valued() => {
                self.value.validate(atom)?;
            }
            (None, Datum::Set(atoms)) if self.is_multi_valued() => {
                for atom in atoms {
                    self.value.validate(atom)?;
                }
            }
            _ => return Err(Error::MalformedValue(datum.to_json())),
        }
        let n = datum.len() as u64;
        if n < self.min || n > self.max {
            return Err(Error::InvalidValue(format!(
                "{n} elements violate the column bounds [{}, {}]",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

// Multiplicity bounds shared by atomic and key-valued columns.
// Both default to 1; "unlimited" is only meaningful for max.
fn parse_min_max(obj: &Map<String, Value>) -> Result<(u64, u64)> {
    let min = match obj.get("min") {
        None => 1,
        Some(node) => node
            .as_u64()
            .ok_or_else(|| Error::Parsing(format!("\"min\" is not an unsigned integer: {node}")))?,
    };
    let max = match obj.get("max") {
        None => 1,
        Some(Value::String(s)) if s == "unlimited" => UNLIMITED,
        Some(node) => node
            .as_u64()
            .ok_or_else(|| Error::Parsing(format!("\"max\" is not an unsigned integer: {node}")))?,
    };
    if min > 1 {
        return Err(Error::Parsing(format!("\"min\" must be 0 or 1, not {min}")));
    }
    if max < 1 || max < min {
        return Err(Error::Parsing(format!(
            "\"max\" must be at least max(min, 1), not {max}"
        )));
    }
    Ok((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn atomic_string_column() {
        let parsed = ColumnType::from_json(&json!({"key": "string"})).unwrap();
        assert_eq!(parsed, ColumnType::scalar(BaseType::string()));
        assert!(!parsed.is_multi_valued());
        assert!(!parsed.is_map());
    }

    #[test]
    fn bare_type_name_column() {
        let parsed = ColumnType::from_json(&json!("integer")).unwrap();
        assert_eq!(parsed, ColumnType::scalar(BaseType::integer()));
    }

    #[test]
    fn unlimited_integer_set() {
        let parsed = ColumnType::from_json(&json!({
            "key": {"type": "integer", "minInteger": 0, "maxInteger": 4095},
            "min": 0,
            "max": "unlimited",
        }))
        .unwrap();

        assert_eq!(
            parsed,
            ColumnType::set(
                BaseType::Integer {
                    min: Some(0),
                    max: Some(4095),
                    choices: None
                },
                0,
                UNLIMITED,
            )
        );
        assert!(parsed.is_multi_valued());

        assert_eq!(
            parsed.value_from_json(&json!(["set", [10, 20, 30]])).unwrap(),
            Datum::Set(vec![Atom::Integer(10), Atom::Integer(20), Atom::Integer(30)]),
        );
        // One-element shorthand.
        assert_eq!(
            parsed.value_from_json(&json!(42)).unwrap(),
            Datum::Set(vec![Atom::Integer(42)]),
        );
        // Range constraint applies per element.
        assert!(matches!(
            parsed.value_from_json(&json!(["set", [9000]])),
            Err(Error::InvalidValue(_)),
        ));
    }

    #[test]
    fn map_column_with_uuid_references() {
        let parsed = ColumnType::from_json(&json!({
            "key": {"type": "integer"},
            "value": {"type": "uuid", "refTable": "Queue"},
            "min": 0,
            "max": "unlimited",
        }))
        .unwrap();
        assert!(parsed.is_map());
        assert_eq!(
            parsed.value,
            BaseType::Uuid {
                ref_table: Some("Queue".to_string()),
                ref_type: RefType::Strong
            },
        );

        let a = "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa";
        let b = "bbbbbbbb-bbbb-bbbb-bbbb-bbbbbbbbbbbb";
        let decoded = parsed
            .value_from_json(&json!(["map", [[0, ["uuid", a]], [7, ["uuid", b]]]]))
            .unwrap();
        assert_eq!(
            decoded,
            Datum::Map(vec![
                (Atom::Integer(0), Atom::Uuid(a.parse().unwrap())),
                (Atom::Integer(7), Atom::Uuid(b.parse().unwrap())),
            ]),
        );

        // Empty map is the nil-equivalent.
        assert_eq!(
            parsed.value_from_json(&json!(["map", []])).unwrap(),
            Datum::empty_map(),
        );

        // A pair must have exactly two members.
        assert!(matches!(
            parsed.value_from_json(&json!(["map", [[0, ["uuid", a], "extra"]]])),
            Err(Error::MalformedValue(_)),
        ));
    }

    #[test]
    fn multiplicity_defaults_and_errors() {
        // Defaults put min == max == 1.
        let scalar = ColumnType::from_json(&json!({"key": "boolean"})).unwrap();
        assert_eq!((scalar.min, scalar.max), (1, 1));

        // min may only be 0 or 1.
        assert!(matches!(
            ColumnType::from_json(&json!({"key": "string", "min": 2, "max": 3})),
            Err(Error::Parsing(_)),
        ));
        // max must cover min.
        assert!(matches!(
            ColumnType::from_json(&json!({"key": "string", "min": 1, "max": 0})),
            Err(Error::Parsing(_)),
        ));
        // Neither atomic nor key-valued.
        assert!(matches!(
            ColumnType::from_json(&json!({"min": 0, "max": 1})),
            Err(Error::UnknownColumnType(_)),
        ));
    }

    #[test]
    fn enum_constraint() {
        let parsed = ColumnType::from_json(&json!({
            "key": {"type": "string", "enum": ["set", ["standalone", "secure"]]},
        }))
        .unwrap();

        assert!(parsed.value_from_json(&json!("secure")).is_ok());
        assert!(matches!(
            parsed.value_from_json(&json!("permissive")),
            Err(Error::InvalidValue(_)),
        ));
    }

    #[test]
    fn string_length_bounds() {
        let base = BaseType::String {
            min_length: Some(2),
            max_length: Some(4),
            choices: None,
        };
        assert!(base.validate(&Atom::String("abc".into())).is_ok());
        assert!(matches!(
            base.validate(&Atom::String("a".into())),
            Err(Error::InvalidValue(_)),
        ));
        assert!(matches!(
            base.validate(&Atom::String("abcde".into())),
            Err(Error::InvalidValue(_)),
        ));
        assert!(matches!(
            base.validate(&Atom::Integer(3)),
            Err(Error::TypeMismatch { .. }),
        ));
    }

    #[test]
    fn scalar_uuid_decoding() {
        let parsed = ColumnType::scalar(BaseType::uuid());
        let id = "36bef046-7da7-43a5-905a-f17899216de7";
        assert_eq!(
            parsed.value_from_json(&json!(["uuid", id])).unwrap(),
            Datum::Atom(Atom::Uuid(id.parse().unwrap())),
        );
        assert_eq!(
            parsed.value_from_json(&json!(["named-uuid", "row0"])).unwrap(),
            Datum::Atom(Atom::NamedUuid("row0".into())),
        );
        assert!(parsed.value_from_json(&json!("not-a-pair")).is_err());
    }

    #[test]
    fn datum_validation_checks_bounds() {
        let column = ColumnType::set(BaseType::integer(), 0, 2);
        assert!(column.validate(&Datum::empty_set()).is_ok());
        assert!(column
            .validate(&Datum::Set(vec![Atom::Integer(1), Atom::Integer(2)]))
            .is_ok());
        assert!(matches!(
            column.validate(&Datum::Set(vec![
                Atom::Integer(1),
                Atom::Integer(2),
                Atom::Integer(3),
            ])),
            Err(Error::InvalidValue(_)),
        ));
        // Shape mismatch: a scalar where a set belongs.
        assert!(matches!(
            column.validate(&Datum::Atom(Atom::Integer(1))),
            Err(Error::MalformedValue(_)),
        ));
    }
}
