pub mod dap;
pub mod error;
pub mod rdp;
pub mod session;

pub use error::Error;
