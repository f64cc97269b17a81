pub mod chrom;
pub mod container;
pub mod error;
pub mod file;
pub mod index;
pub mod selection;
pub mod utils;
pub mod writer;
pub mod zarr;
