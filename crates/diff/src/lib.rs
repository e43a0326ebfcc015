//! kinspect diff: structural comparison of semi-structured records.
//!
//! - `structural`: deep equality with ignore-lists and prefix normalization
//! - `keys`: key naming convention transforms (snake_case <-> camelCase)
//! - `reconcile`: partition two named collections into matching/changed/missing
//! - `envoy`: version isolation and listener filter-chain matching
//! - `table`: comparison output rows

#![forbid(unsafe_code)]

pub mod envoy;
pub mod keys;
pub mod reconcile;
pub mod structural;
pub mod table;

pub use envoy::{classify_change, compare_listeners, ChangeKind, ClassifiedChange, ListenerDiff, Side};
pub use keys::{camel_to_snake, snake_to_camel, transform, transform_item};
pub use reconcile::{reconcile, reconcile_against_first, ChangedPair, IdentityOpts, Named, Reconciliation};
pub use structural::{compare, compare_flat_arrays, compare_values, values_equal, CompareOpts, Comparison, PLACEHOLDER};
