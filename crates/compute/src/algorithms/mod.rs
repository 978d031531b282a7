pub mod filter;
pub mod iclust;
pub mod matrix;
pub mod mutual_info;
