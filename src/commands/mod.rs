pub mod align;
pub mod merge;
pub mod prepare;
