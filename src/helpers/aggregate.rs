//! Counting.

use crate::collection::PCollection;
use crate::combiners::SumLongs;
use crate::error::GraphConstructionError;
use crate::types::table_type;
use crate::value::Value;

impl PCollection {
    /// `collection<T>` to `table<T, long>`: how often each distinct element occurs.
    ///
    /// `T` must support equality and hashing, since it becomes a shuffle key.
    pub fn count(&self) -> Result<PCollection, GraphConstructionError> {
        let family = self.ptype().family();
        let ones = table_type(self.ptype(), &family.longs())?;
        self.map("count_ones", ones, |v| Ok(Value::pair(v, 1i64)))?
            .group_by_key()?
            .combine_values(SumLongs)
    }
}
