//! Pull-based operators over the cairn storage kernel: table scans, grouping
//! aggregation, and insert/delete.

pub mod aggregate;
pub mod dml;
pub mod errors;
pub mod op_iterator;
pub mod seq_scan;

pub use aggregate::{
    Aggregate, AggregateOp, Aggregator, IntegerAggregator, StringAggregator, NO_GROUPING,
};
pub use dml::{Delete, Insert};
pub use errors::{ExecutionError, Result};
pub use op_iterator::{OpIterator, TupleIterator};
pub use seq_scan::SeqScan;
