pub mod cluster;
pub mod points;

pub use cluster::*;
pub use points::*;
