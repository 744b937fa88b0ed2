mod error;
pub use error::*;

mod dag;
pub use dag::*;

mod mapping;
pub use mapping::*;

mod executor;
pub use executor::*;
