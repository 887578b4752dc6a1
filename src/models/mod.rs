pub mod enquiry;
pub mod message;
pub mod user;

pub use enquiry::*;
pub use message::*;
pub use user::*;
