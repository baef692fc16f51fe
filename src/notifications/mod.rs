//! Outbound email: magic links and organization invitations.

mod email;

pub use email::SystemEmailService;
