pub mod containment;
pub mod drawing;
pub mod error;
pub mod polygon;
pub mod result;
pub mod selector;

pub use containment::*;
pub use drawing::*;
pub use error::*;
pub use polygon::*;
pub use result::*;
pub use selector::*;
