//! Grouping aggregation.
//!
//! An [`Aggregator`] folds tuples into per-group accumulators one at a time and
//! then serves one result tuple per group through a [`TupleIterator`]. The
//! [`Aggregate`] operator drives an aggregator from a child operator.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use cairn::{Field, Tuple, TupleDesc, Type};

use crate::errors::{ExecutionError, Result};
use crate::op_iterator::{OpIterator, TupleIterator};

/// Passed as the group-by field to aggregate over the whole input as one group.
pub const NO_GROUPING: Option<usize> = None;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateOp {
    Min,
    Max,
    Sum,
    Avg,
    Count,
    /// Sum and count in one pass, for distributed averaging.
    SumCount,
    /// Average over partial (sum, count) results.
    ScAvg,
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Sum => "sum",
            AggregateOp::Avg => "avg",
            AggregateOp::Count => "count",
            AggregateOp::SumCount => "sum_count",
            AggregateOp::ScAvg => "sc_avg",
        };
        f.write_str(name)
    }
}

pub trait Aggregator {
    /// Folds one tuple into its group. Tuples with an unset group key or an
    /// unset aggregate value are skipped.
    fn merge_tuple_into_group(&mut self, tuple: &Tuple) -> Result<()>;

    /// One tuple per group seen so far, in no particular order.
    fn iterator(&self) -> Result<TupleIterator>;

    /// `(group type, INT)` when grouping, `(INT)` otherwise.
    fn result_desc(&self) -> &Arc<TupleDesc>;
}

/// Group-key extraction shared by both aggregators.
#[derive(Debug)]
struct Grouping {
    field: Option<usize>,
    field_type: Type,
    afield: usize,
    desc: Arc<TupleDesc>,
}

impl Grouping {
    fn new(field: Option<usize>, field_type: Type, afield: usize) -> Result<Self> {
        let types = match field {
            Some(_) => vec![field_type, Type::Int],
            None => vec![Type::Int],
        };
        Ok(Self {
            field,
            field_type,
            afield,
            desc: Arc::new(TupleDesc::from_types(&types)?),
        })
    }

    /// `Ok(None)` means the tuple belongs to no group and must be skipped.
    fn key<'t>(&self, tuple: &'t Tuple) -> Result<Option<(Option<Field>, &'t Field)>> {
        let Some(value) = tuple.field(self.afield)? else {
            return Ok(None);
        };
        let Some(index) = self.field else {
            return Ok(Some((None, value)));
        };
        let Some(key) = tuple.field(index)? else {
            return Ok(None);
        };
        if key.field_type() != self.field_type {
            return Err(ExecutionError::Schema(format!(
                "group field {index} is {}, expected {}",
                key.field_type(),
                self.field_type
            )));
        }
        Ok(Some((Some(key.clone()), value)))
    }

    fn result_tuple(&self, key: &Option<Field>, value: i32) -> Result<Tuple> {
        let mut fields = Vec::with_capacity(2);
        fields.extend(key.clone());
        fields.push(Field::Int(value));
        Ok(Tuple::with_fields(self.desc.clone(), fields)?)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Accumulator {
    count: i64,
    sum: i64,
    min: Option<i32>,
    max: Option<i32>,
}

impl Accumulator {
    fn add(&mut self, value: i32) {
        self.count += 1;
        self.sum += i64::from(value);
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn evaluate(&self, op: AggregateOp) -> Result<i32> {
        let wide = match op {
            AggregateOp::Count => self.count,
            AggregateOp::Sum => self.sum,
            // i64 division truncates toward zero
            AggregateOp::Avg => self.sum / self.count.max(1),
            AggregateOp::Min => self.min.map(i64::from).unwrap_or_default(),
            AggregateOp::Max => self.max.map(i64::from).unwrap_or_default(),
            AggregateOp::SumCount | AggregateOp::ScAvg => {
                return Err(ExecutionError::UnsupportedOp(op))
            }
        };
        i32::try_from(wide).map_err(|_| ExecutionError::Overflow(wide))
    }
}

/// Aggregates an INT field with COUNT, SUM, AVG, MIN or MAX.
#[derive(Debug)]
pub struct IntegerAggregator {
    grouping: Grouping,
    op: AggregateOp,
    groups: HashMap<Option<Field>, Accumulator>,
}

impl IntegerAggregator {
    pub fn new(
        gbfield: Option<usize>,
        gbfield_type: Type,
        afield: usize,
        op: AggregateOp,
    ) -> Result<Self> {
        if matches!(op, AggregateOp::SumCount | AggregateOp::ScAvg) {
            return Err(ExecutionError::IllegalArgument(format!(
                "integer aggregation does not support {op}"
            )));
        }
        Ok(Self {
            grouping: Grouping::new(gbfield, gbfield_type, afield)?,
            op,
            groups: HashMap::new(),
        })
    }

    pub fn op(&self) -> AggregateOp {
        self.op
    }
}

impl Aggregator for IntegerAggregator {
    fn merge_tuple_into_group(&mut self, tuple: &Tuple) -> Result<()> {
        let Some((key, value)) = self.grouping.key(tuple)? else {
            return Ok(());
        };
        let value = value.as_int().ok_or_else(|| {
            ExecutionError::Schema(format!(
                "aggregate field {} is not an INT",
                self.grouping.afield
            ))
        })?;
        self.groups.entry(key).or_default().add(value);
        Ok(())
    }

    fn iterator(&self) -> Result<TupleIterator> {
        let tuples = self
            .groups
            .iter()
            .map(|(key, acc)| self.grouping.result_tuple(key, acc.evaluate(self.op)?))
            .collect::<Result<Vec<_>>>()?;
        TupleIterator::new(self.grouping.desc.clone(), tuples)
    }

    fn result_desc(&self) -> &Arc<TupleDesc> {
        &self.grouping.desc
    }
}

/// Aggregates a STRING field. Only COUNT is meaningful.
#[derive(Debug)]
pub struct StringAggregator {
    grouping: Grouping,
    counts: HashMap<Option<Field>, i64>,
}

impl StringAggregator {
    pub fn new(
        gbfield: Option<usize>,
        gbfield_type: Type,
        afield: usize,
        op: AggregateOp,
    ) -> Result<Self> {
        if op != AggregateOp::Count {
            return Err(ExecutionError::IllegalArgument(format!(
                "string aggregation supports only count, got {op}"
            )));
        }
        Ok(Self {
            grouping: Grouping::new(gbfield, gbfield_type, afield)?,
            counts: HashMap::new(),
        })
    }
}

impl Aggregator for StringAggregator {
    fn merge_tuple_into_group(&mut self, tuple: &Tuple) -> Result<()> {
        if let Some((key, _)) = self.grouping.key(tuple)? {
            *self.counts.entry(key).or_insert(0) += 1;
        }
        Ok(())
    }

    fn iterator(&self) -> Result<TupleIterator> {
        let tuples = self
            .counts
            .iter()
            .map(|(key, &count)| {
                let count = i32::try_from(count).map_err(|_| ExecutionError::Overflow(count))?;
                self.grouping.result_tuple(key, count)
            })
            .collect::<Result<Vec<_>>>()?;
        TupleIterator::new(self.grouping.desc.clone(), tuples)
    }

    fn result_desc(&self) -> &Arc<TupleDesc> {
        &self.grouping.desc
    }
}

/// Computes one aggregate over its child, optionally grouped by one field.
///
/// The child is drained on `open`; results are served from memory after that.
/// Output fields are named after the group field and `op(field)`.
pub struct Aggregate<'a> {
    child: Box<dyn OpIterator + 'a>,
    gbfield: Option<usize>,
    afield: usize,
    op: AggregateOp,
    desc: Arc<TupleDesc>,
    results: Option<TupleIterator>,
}

impl<'a> Aggregate<'a> {
    pub fn new(
        child: Box<dyn OpIterator + 'a>,
        afield: usize,
        gbfield: Option<usize>,
        op: AggregateOp,
    ) -> Result<Self> {
        let child_desc = child.tuple_desc().clone();
        // validates the field indexes and the op before any tuple is pulled
        let aggregator = Self::aggregator(&child_desc, afield, gbfield, op)?;

        let agg_name = format!(
            "{op}({})",
            child_desc.field_name(afield)?.unwrap_or("null")
        );
        let mut types = Vec::with_capacity(2);
        let mut names = Vec::with_capacity(2);
        if let Some(index) = gbfield {
            types.push(child_desc.field_type(index)?);
            names.push(child_desc.field_name(index)?);
        }
        types.push(Type::Int);
        names.push(Some(agg_name.as_str()));
        let desc = Arc::new(TupleDesc::new(&types, &names)?);
        debug_assert!(*desc == **aggregator.result_desc());

        Ok(Self {
            child,
            gbfield,
            afield,
            op,
            desc,
            results: None,
        })
    }

    pub fn group_field(&self) -> Option<usize> {
        self.gbfield
    }

    pub fn aggregate_field(&self) -> usize {
        self.afield
    }

    pub fn op(&self) -> AggregateOp {
        self.op
    }

    fn aggregator(
        child_desc: &TupleDesc,
        afield: usize,
        gbfield: Option<usize>,
        op: AggregateOp,
    ) -> Result<Box<dyn Aggregator>> {
        let gbtype = match gbfield {
            Some(index) => child_desc.field_type(index)?,
            None => Type::Int,
        };
        Ok(match child_desc.field_type(afield)? {
            Type::Int => Box::new(IntegerAggregator::new(gbfield, gbtype, afield, op)?),
            Type::String => Box::new(StringAggregator::new(gbfield, gbtype, afield, op)?),
        })
    }
}

impl OpIterator for Aggregate<'_> {
    fn open(&mut self) -> Result<()> {
        let mut aggregator =
            Self::aggregator(self.child.tuple_desc(), self.afield, self.gbfield, self.op)?;
        self.child.open()?;
        while self.child.has_next()? {
            aggregator.merge_tuple_into_group(&self.child.next()?)?;
        }
        let mut groups = aggregator.iterator()?;
        cairn::cairn_debug_log!("[Aggregate::open] {} produced {} groups", self.op, groups.len());

        // re-label the aggregator's unnamed tuples with the output names
        let mut tuples = Vec::with_capacity(groups.len());
        groups.open()?;
        while groups.has_next()? {
            let fields = groups.next()?.fields().flatten().cloned().collect();
            tuples.push(Tuple::with_fields(self.desc.clone(), fields)?);
        }
        let mut results = TupleIterator::new(self.desc.clone(), tuples)?;
        results.open()?;
        self.results = Some(results);
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        match self.results.as_mut() {
            Some(results) => results.has_next(),
            None => Ok(false),
        }
    }

    fn next(&mut self) -> Result<Tuple> {
        self.results
            .as_mut()
            .ok_or(ExecutionError::NoSuchElement)?
            .next()
    }

    fn rewind(&mut self) -> Result<()> {
        self.results.as_mut().ok_or(ExecutionError::NotOpen)?.rewind()
    }

    fn close(&mut self) {
        self.results = None;
        self.child.close();
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }
}
