// Library exports for Townsquare
// This allows integration tests and external code to use Townsquare modules

pub mod auth;
pub mod comments;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod karma;
pub mod likes;
pub mod posts;
pub mod routes;
pub mod state;
