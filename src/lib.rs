pub mod config;
pub mod ring;
pub mod router_service;
