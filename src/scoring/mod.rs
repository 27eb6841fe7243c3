//! Ridership aggregation and ghost scoring.
//!
//! Daily ridership rows are rolled up into one [`types::RidershipAggregate`]
//! per station, which the ghost score engine then ranks against each other.
//! Stations with the lowest recent ridership get the highest score.

pub mod aggregate;
pub mod ghost;
pub mod types;
pub mod utility;
