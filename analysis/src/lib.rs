//! Baselines and scoring on top of the ingested dataset.

pub mod baseline;
pub mod canonical;
pub mod convert;
pub mod derive;
pub mod query;
pub mod score;

pub use baseline::{
    BaselineDocument, BaselineEntry, BaselineError, BaselineKind, BaselineStore, MetricBaseline,
    QueryBaseline,
};
pub use canonical::metric_key;
pub use derive::{BaselineFormat, DeriveError, Derivation};
pub use query::{FilterRequest, FilterResponse};

#[cfg(test)]
mod baseline_test;
#[cfg(test)]
mod convert_test;
#[cfg(test)]
mod query_test;
