mod error;
mod filter;
mod query;
mod traits;

pub use error::{BackendError, FilterParseError, Result};
pub use filter::{FilterOp, RowFilter};
pub use query::{Order, Query};
pub use traits::QueryBackend;
