//! Profile domain - what the coach knows about a user between flows.

mod user_profile;

pub use user_profile::UserProfile;
