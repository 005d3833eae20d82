//! The pull-based operator protocol.

use std::sync::Arc;

use cairn::{Tuple, TupleDesc};

use crate::errors::{ExecutionError, Result};

/// A restartable cursor over a finite sequence of tuples with a fixed schema.
///
/// A new operator is closed. `open` positions it before the first tuple,
/// `has_next` never advances, `next` fails with [`ExecutionError::NoSuchElement`]
/// once the sequence is exhausted, and `rewind` restarts an open operator from
/// the beginning. `close` drops cursor state only; page locks stay with the
/// transaction until it completes.
pub trait OpIterator {
    fn open(&mut self) -> Result<()>;

    fn has_next(&mut self) -> Result<bool>;

    fn next(&mut self) -> Result<Tuple>;

    fn rewind(&mut self) -> Result<()>;

    fn close(&mut self);

    fn tuple_desc(&self) -> &Arc<TupleDesc>;
}

/// An operator over tuples already in memory. Aggregation results are served
/// through one of these.
#[derive(Debug, Clone)]
pub struct TupleIterator {
    desc: Arc<TupleDesc>,
    tuples: Vec<Tuple>,
    cursor: Option<usize>,
}

impl TupleIterator {
    /// Every tuple must match `desc` (field names aside).
    pub fn new(desc: Arc<TupleDesc>, tuples: Vec<Tuple>) -> Result<Self> {
        if let Some(bad) = tuples.iter().find(|t| **t.tuple_desc() != *desc) {
            return Err(ExecutionError::Schema(format!(
                "tuple ({}) does not match iterator schema ({desc})",
                bad.tuple_desc()
            )));
        }
        Ok(Self {
            desc,
            tuples,
            cursor: None,
        })
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }
}

impl OpIterator for TupleIterator {
    fn open(&mut self) -> Result<()> {
        self.cursor = Some(0);
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        Ok(self.cursor.is_some_and(|i| i < self.tuples.len()))
    }

    fn next(&mut self) -> Result<Tuple> {
        match self.cursor {
            Some(i) if i < self.tuples.len() => {
                self.cursor = Some(i + 1);
                Ok(self.tuples[i].clone())
            }
            _ => Err(ExecutionError::NoSuchElement),
        }
    }

    fn rewind(&mut self) -> Result<()> {
        if self.cursor.is_none() {
            return Err(ExecutionError::NotOpen);
        }
        self.close();
        self.open()
    }

    fn close(&mut self) {
        self.cursor = None;
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }
}

/// Drains an open operator into a vector.
pub fn collect_all(op: &mut dyn OpIterator) -> Result<Vec<Tuple>> {
    let mut tuples = Vec::new();
    while op.has_next()? {
        tuples.push(op.next()?);
    }
    Ok(tuples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn::{Field, Type};

    fn ints(values: &[i32]) -> TupleIterator {
        let desc = Arc::new(TupleDesc::from_types(&[Type::Int]).unwrap());
        let tuples = values
            .iter()
            .map(|v| Tuple::with_fields(desc.clone(), vec![Field::Int(*v)]).unwrap())
            .collect();
        TupleIterator::new(desc, tuples).unwrap()
    }

    #[test]
    fn test_lifecycle() {
        let mut it = ints(&[1, 2]);
        assert!(!it.has_next().unwrap());
        assert!(matches!(it.rewind(), Err(ExecutionError::NotOpen)));

        it.open().unwrap();
        assert!(it.has_next().unwrap());
        assert!(it.has_next().unwrap());
        assert_eq!(it.next().unwrap().field(0).unwrap(), Some(&Field::Int(1)));
        assert_eq!(it.next().unwrap().field(0).unwrap(), Some(&Field::Int(2)));
        assert!(!it.has_next().unwrap());
        assert!(matches!(it.next(), Err(ExecutionError::NoSuchElement)));

        it.rewind().unwrap();
        assert_eq!(collect_all(&mut it).unwrap().len(), 2);
        it.close();
        assert!(!it.has_next().unwrap());
    }

    #[test]
    fn test_rejects_foreign_tuples() {
        let desc = Arc::new(TupleDesc::from_types(&[Type::Int]).unwrap());
        let other = Arc::new(TupleDesc::from_types(&[Type::String]).unwrap());
        let t = Tuple::with_fields(other, vec![Field::from("x")]).unwrap();
        assert!(matches!(
            TupleIterator::new(desc, vec![t]),
            Err(ExecutionError::Schema(_))
        ));
    }
}
