pub mod advance;
pub mod controller;
pub mod db;
pub mod duration;
pub mod guidance;
pub mod models;
pub mod recovery;
pub mod service;
pub mod settings;
pub mod store;
