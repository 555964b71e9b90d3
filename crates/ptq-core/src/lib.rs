pub mod error;
pub mod ids;
pub mod model;
pub mod ordering;
pub mod snapshot;
pub mod types;

pub use error::*;
pub use ids::*;
pub use model::*;
pub use ordering::*;
pub use snapshot::*;
pub use types::*;
