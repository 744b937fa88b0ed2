mod error;
pub use error::*;

mod spec;
pub use spec::*;

mod result;
pub use result::*;

#[cfg(feature = "postgres")]
mod sql;
#[cfg(feature = "postgres")]
pub use sql::*;

mod graph;
pub use graph::*;

mod http;
pub use http::*;

mod pool;
pub use pool::*;
