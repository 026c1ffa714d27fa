pub(crate) mod cookie;
pub(crate) mod discovery;
pub(crate) mod encoding;
pub(crate) mod file_description;
pub mod session;

pub use cookie::*;
pub use discovery::*;
pub use encoding::*;
pub use file_description::*;
