//! Schemas and rows.

use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut};

use crate::error::{DbError, Result};
use crate::page_id::RecordId;
use crate::types::{Field, Type};

/// One column of a [`TupleDesc`].
#[derive(Debug, Clone)]
pub struct TdItem {
    pub field_type: Type,
    pub field_name: Option<String>,
}

impl fmt::Display for TdItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({})",
            self.field_name.as_deref().unwrap_or("null"),
            self.field_type
        )
    }
}

/// The schema of a tuple: an ordered, non-empty list of typed, optionally named fields.
///
/// Equality only looks at the type sequence; names are ignored.
#[derive(Debug, Clone)]
pub struct TupleDesc {
    items: Vec<TdItem>,
}

impl TupleDesc {
    /// Creates a descriptor with named fields. `names` must be as long as `types`.
    pub fn new(types: &[Type], names: &[Option<&str>]) -> Result<Self> {
        if types.is_empty() {
            return Err(DbError::Schema(
                "a tuple descriptor needs at least one field".to_string(),
            ));
        }
        if types.len() != names.len() {
            return Err(DbError::Schema(format!(
                "{} types but {} names",
                types.len(),
                names.len()
            )));
        }
        let items = types
            .iter()
            .zip(names)
            .map(|(t, n)| TdItem {
                field_type: *t,
                field_name: n.map(str::to_string),
            })
            .collect();
        Ok(Self { items })
    }

    /// Creates a descriptor with anonymous fields.
    pub fn from_types(types: &[Type]) -> Result<Self> {
        Self::new(types, &vec![None; types.len()])
    }

    pub fn num_fields(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> impl Iterator<Item = &TdItem> {
        self.items.iter()
    }

    pub fn field_type(&self, i: usize) -> Result<Type> {
        self.item(i).map(|item| item.field_type)
    }

    pub fn field_name(&self, i: usize) -> Result<Option<&str>> {
        self.item(i).map(|item| item.field_name.as_deref())
    }

    /// Finds the first field called `name`. A qualified `table.field` name matches on
    /// the part after the dot.
    pub fn field_name_to_index(&self, name: &str) -> Result<usize> {
        let wanted = name.rsplit_once('.').map_or(name, |(_, field)| field);
        self.items
            .iter()
            .position(|item| {
                item.field_name.as_deref().map(unqualified) == Some(wanted)
            })
            .ok_or_else(|| DbError::NotFound(format!("no field named {name}")))
    }

    /// Size in bytes of one serialized tuple.
    pub fn size(&self) -> usize {
        self.items.iter().map(|item| item.field_type.byte_len()).sum()
    }

    /// Concatenates two descriptors, `a`'s fields first.
    pub fn merge(a: &TupleDesc, b: &TupleDesc) -> TupleDesc {
        let mut items = a.items.clone();
        items.extend(b.items.iter().cloned());
        TupleDesc { items }
    }

    fn item(&self, i: usize) -> Result<&TdItem> {
        self.items.get(i).ok_or(DbError::IndexOutOfRange {
            index: i,
            len: self.items.len(),
        })
    }
}

fn unqualified(name: &str) -> &str {
    name.rsplit_once('.').map_or(name, |(_, field)| field)
}

impl PartialEq for TupleDesc {
    fn eq(&self, other: &Self) -> bool {
        self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(&other.items)
                .all(|(a, b)| a.field_type == b.field_type)
    }
}

impl Eq for TupleDesc {}

impl fmt::Display for TupleDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{item}")?;
        }
        Ok(())
    }
}

/// A row of fields matching a [`TupleDesc`]. Fields start unset and are filled in
/// with [`Tuple::set_field`]; rows read from disk are always complete.
#[derive(Debug, Clone)]
pub struct Tuple {
    desc: Arc<TupleDesc>,
    fields: Vec<Option<Field>>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(desc: Arc<TupleDesc>) -> Self {
        let fields = vec![None; desc.num_fields()];
        Self {
            desc,
            fields,
            record_id: None,
        }
    }

    /// Builds a complete tuple, checking arity and per-position types.
    pub fn with_fields(desc: Arc<TupleDesc>, fields: Vec<Field>) -> Result<Self> {
        if fields.len() != desc.num_fields() {
            return Err(DbError::Schema(format!(
                "descriptor has {} fields, got {} values",
                desc.num_fields(),
                fields.len()
            )));
        }
        let mut tuple = Self::new(desc);
        for (i, field) in fields.into_iter().enumerate() {
            tuple.set_field(i, field)?;
        }
        Ok(tuple)
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    /// Returns the i-th field, or `None` if it has not been set.
    pub fn field(&self, i: usize) -> Result<Option<&Field>> {
        self.fields
            .get(i)
            .map(Option::as_ref)
            .ok_or(DbError::IndexOutOfRange {
                index: i,
                len: self.fields.len(),
            })
    }

    pub fn set_field(&mut self, i: usize, field: Field) -> Result<()> {
        let expected = self.desc.field_type(i)?;
        if field.field_type() != expected {
            return Err(DbError::Schema(format!(
                "field {i} expects {expected}, got {}",
                field.field_type()
            )));
        }
        self.fields[i] = Some(field);
        Ok(())
    }

    pub fn fields(&self) -> impl Iterator<Item = Option<&Field>> {
        self.fields.iter().map(Option::as_ref)
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, rid: Option<RecordId>) {
        self.record_id = rid;
    }

    /// Writes the fixed-width encoding of every field. All fields must be set.
    pub fn serialize(&self, buf: &mut impl BufMut) -> Result<()> {
        for (i, field) in self.fields.iter().enumerate() {
            match field {
                Some(field) => field.serialize(buf),
                None => {
                    return Err(DbError::Schema(format!(
                        "field {i} is unset and cannot be stored"
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn parse(desc: Arc<TupleDesc>, buf: &mut impl Buf) -> Result<Self> {
        let fields = desc
            .items()
            .map(|item| item.field_type.parse(buf).map(Some))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            desc,
            fields,
            record_id: None,
        })
    }
}

impl PartialEq for Tuple {
    /// Tuples are equal when their schemas and values are; location is ignored.
    fn eq(&self, other: &Self) -> bool {
        *self.desc == *other.desc && self.fields == other.fields
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, "\t")?;
            }
            match field {
                Some(field) => write!(f, "{field}")?,
                None => write!(f, "null")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(types: &[Type], names: &[&str]) -> TupleDesc {
        let names: Vec<Option<&str>> = names.iter().map(|n| Some(*n)).collect();
        TupleDesc::new(types, &names).unwrap()
    }

    #[test]
    fn test_construction_rejects_bad_input() {
        assert!(matches!(TupleDesc::from_types(&[]), Err(DbError::Schema(_))));
        assert!(matches!(
            TupleDesc::new(&[Type::Int, Type::Int], &[Some("a")]),
            Err(DbError::Schema(_))
        ));
    }

    #[test]
    fn test_size_and_merge() {
        let a = TupleDesc::from_types(&[Type::Int, Type::String]).unwrap();
        let b = TupleDesc::from_types(&[Type::Int]).unwrap();
        assert_eq!(a.size(), 4 + Type::String.byte_len());

        let merged = TupleDesc::merge(&a, &b);
        assert_eq!(merged.num_fields(), a.num_fields() + b.num_fields());
        assert_eq!(merged.field_type(2).unwrap(), Type::Int);
    }

    #[test]
    fn test_equality_ignores_names() {
        let a = named(&[Type::Int, Type::String], &["x", "y"]);
        let b = TupleDesc::from_types(&[Type::Int, Type::String]).unwrap();
        let c = TupleDesc::from_types(&[Type::String, Type::Int]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_field_name_lookup() {
        let td = named(&[Type::Int, Type::Int, Type::Int], &["a", "b", "b"]);
        assert_eq!(td.field_name_to_index("b").unwrap(), 1);
        assert_eq!(td.field_name_to_index("t.a").unwrap(), 0);
        assert!(matches!(
            td.field_name_to_index("zzz"),
            Err(DbError::NotFound(_))
        ));
        assert!(matches!(
            td.field_type(3),
            Err(DbError::IndexOutOfRange { index: 3, len: 3 })
        ));
    }

    #[test]
    fn test_lookup_matches_qualified_stored_names() {
        let td = named(&[Type::Int, Type::Int], &["t.id", "t.v"]);
        assert_eq!(td.field_name_to_index("v").unwrap(), 1);
        assert_eq!(td.field_name_to_index("t.v").unwrap(), 1);
    }

    #[test]
    fn test_tuple_type_checks() {
        let td = Arc::new(TupleDesc::from_types(&[Type::Int]).unwrap());
        assert!(Tuple::with_fields(td.clone(), vec![Field::from("no")]).is_err());
        assert!(Tuple::with_fields(td.clone(), vec![]).is_err());

        let mut t = Tuple::new(td);
        assert_eq!(t.field(0).unwrap(), None);
        t.set_field(0, Field::Int(7)).unwrap();
        assert_eq!(t.field(0).unwrap(), Some(&Field::Int(7)));
    }

    #[test]
    fn test_unset_field_cannot_be_serialized() {
        let td = Arc::new(TupleDesc::from_types(&[Type::Int, Type::Int]).unwrap());
        let t = Tuple::new(td);
        let mut buf = Vec::new();
        assert!(matches!(t.serialize(&mut buf), Err(DbError::Schema(_))));
    }
}
