//! Post-processing of FMS climate model history archives into time series,
//! annual averages and monthly climatologies.
pub mod error;
pub mod logging;
pub mod calendar;
pub mod frequency;
pub mod naming;
pub mod dataset;
pub mod extract;
pub mod compute;
pub mod io;
pub mod config;
pub mod diag_table;
#[cfg(feature = "netcdf")]
pub mod pipeline;
