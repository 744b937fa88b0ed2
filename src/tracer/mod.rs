mod builder;
pub use builder::*;

mod store;
pub use store::*;

#[cfg(feature = "postgres")]
mod pg;
#[cfg(feature = "postgres")]
pub use pg::*;
