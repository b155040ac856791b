/// Data retrieval from the public USACE / ArcGIS JSON services.
///
/// Submodules:
/// - `http`  : the `JsonSource` seam and its blocking reqwest implementation
/// - `arcgis`: FeatureServer queries: offset pagination and batched IN-clauses
/// - `cwms`  : CWMS catalog listings and reporting time series

pub mod arcgis;
pub mod cwms;
pub mod http;

#[cfg(test)]
pub(crate) mod fixtures;
