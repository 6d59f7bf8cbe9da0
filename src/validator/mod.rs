mod code;
pub use code::*;

mod finding;
pub use finding::*;

mod hints;
pub use hints::*;

mod validator;
pub use validator::*;
