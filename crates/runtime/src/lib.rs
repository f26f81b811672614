pub mod cancel;
pub mod coalesce;

pub use cancel::*;
pub use coalesce::*;
