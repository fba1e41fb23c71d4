pub mod config;
pub mod crds;
pub mod error;
pub mod es;
pub mod index_controller;
pub mod secret;
pub mod shutdown;
