mod invitation;
mod organization;
mod processor;
mod session;
mod user;

pub use invitation::*;
pub use organization::*;
pub use processor::*;
pub use session::*;
pub use user::*;
