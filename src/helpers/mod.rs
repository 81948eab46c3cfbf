//! Derived operations built only from core IR nodes.
//!
//! - [`cogroup`](crate::PCollection::cogroup): group two keyed collections
//!   together, keeping each side's values apart.
//! - [`join`](crate::PCollection::join): inner join on key, built on cogroup.
//! - [`count`](crate::PCollection::count): occurrences of each distinct element.

pub(crate) mod aggregate;
pub(crate) mod cogroup;
pub(crate) mod joins;

pub use cogroup::CogroupConcat;
