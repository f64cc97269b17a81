pub mod apply;
pub mod core;
pub mod genotype;
pub mod merge;
pub mod var;
