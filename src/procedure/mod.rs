mod definition;
pub use definition::*;

mod result;
pub use result::*;
