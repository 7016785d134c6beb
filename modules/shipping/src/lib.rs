pub mod config;
pub mod consumer;
pub mod contracts;
pub mod db;
pub mod dlq;
pub mod health;
pub mod models;
pub mod publisher;
pub mod repos;
pub mod routes;
pub mod service;

pub use consumer::start_order_completed_consumer;
pub use dlq::start_dlq_observer;
