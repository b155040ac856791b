/// Record linkage: joining catalogs on a shared key and assigning CWMS
/// location codes to reservoirs.
///
/// - `join`       : left-outer join, first occurrence wins on duplicate keys
/// - `code_match` : name → code table lookup and heuristic code inference

pub mod code_match;
pub mod join;
