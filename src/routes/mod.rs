pub mod auth;
pub mod health;

pub use auth as auth_routes;
