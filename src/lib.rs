pub mod config;
pub mod crm;
pub mod gateway;
pub mod handlers;
pub mod models;
pub mod notify;
pub mod repository;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;
