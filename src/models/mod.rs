pub mod agent;
pub mod call;
pub mod auth;
pub mod webhook;
pub mod phone_number;
pub mod integration;

pub use agent::*;
pub use call::*;
pub use auth::*;
pub use webhook::*;
pub use phone_number::*;
pub use integration::*;
