pub mod error;
pub mod headless;
pub mod loader;
pub mod native;
pub mod session;

pub use error::*;
pub use loader::*;
pub use native::*;
pub use session::*;
