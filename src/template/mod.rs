mod error;
pub use error::*;

mod text_template;
pub use text_template::*;
