pub mod assets;
pub mod chat;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod groups;
pub mod models;
pub mod profile;
pub mod server;
pub mod session;
pub mod storage;
