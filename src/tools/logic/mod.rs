mod filter_items;
pub use filter_items::*;
