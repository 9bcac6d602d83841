//! Tabular regression kernel used by the stages.

/// ElasticNet model fitted by coordinate descent.
pub mod elastic_net;
/// Split and metric helpers.
pub mod func;
/// Training and evaluation reports.
pub mod reporter;
/// CSV-backed row table.
pub mod table;
