pub mod api;
pub mod config;
pub mod link_repo;
pub mod link_service;
pub mod short_code;

mod orm;
