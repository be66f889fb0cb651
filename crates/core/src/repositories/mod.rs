//! Visit workflow services.
//!
//! Each service wraps the [`Store`](crate::store::Store) and runs every operation as one
//! transaction. The workflow services (handover, discharge) reuse the transactional helpers of
//! the bed and billing services instead of calling their public methods, so that one workflow
//! step never spans two transactions.

pub mod beds;
pub mod billing;
pub mod discharge;
pub mod handover;
pub mod records;
pub mod visits;
