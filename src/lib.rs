pub mod api;
pub mod config;
pub mod display;
pub mod model;
pub mod qr;
pub mod scanner;
