mod if_branch;
pub use if_branch::*;

mod switch_branch;
pub use switch_branch::*;

mod parallel;
pub use parallel::*;

mod foreach;
pub use foreach::*;
