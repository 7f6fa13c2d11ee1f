pub mod auth;
pub mod conversations;
pub mod errands;
pub mod error;
pub mod middleware;
pub mod profiles;
pub mod reports;
pub mod storage;
