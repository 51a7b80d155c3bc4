//! Safe SQL builder: identifiers from registrations only, values as parameters.

mod builder;
pub mod params;
pub use builder::*;
pub use params::to_param;
