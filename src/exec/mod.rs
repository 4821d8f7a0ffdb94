//! Query execution: row selection strategies and post-selection mutation.
//!
//! The selector picks the cheapest fetch strategy for a query; the
//! operators then transform the selected row set in a fixed stage order:
//! join → group-by → orm → projection/functions → having → order-by →
//! offset → limit.

pub mod operators;
pub mod selector;
