//! Station matching and ghost scoring for rail ridership.
//!
//! Canonical stations come from a GTFS feed ([`ingest::gtfs`]). Daily
//! ridership rows, published under their own station labels, are resolved
//! to those stations by the [`matcher::StationMatcher`] and stored per day.
//! [`scoring::ghost`] then ranks every station of a city by recent
//! ridership into a 0-100 ghost score.

pub mod error;
pub mod fetch;
pub mod ingest;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod output;
pub mod profile;
pub mod scoring;
pub mod store;
pub mod tables;
