//! Route trees for the three HTTP planes

pub mod admin;
pub mod public;
pub mod user;
