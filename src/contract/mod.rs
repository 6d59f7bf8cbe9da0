mod meta;
pub use meta::*;

mod contract;
pub use contract::*;

mod output_shape;
pub use output_shape::*;
