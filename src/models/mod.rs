pub mod admin;
pub mod client;
pub mod panel;
pub mod response;
