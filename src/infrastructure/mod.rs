pub mod bootstrap;
pub mod config;
pub mod db;
pub mod defects;
pub mod llm_clients;
pub mod playwright;
pub mod pubsub;
pub mod sandbox;
