pub mod config;
pub mod world;
pub mod policy;
pub mod approval;
pub mod notification;
pub mod persist;
pub mod auth;
pub mod error;
pub mod registry;
pub mod mail;
pub mod dispatch;
pub mod state;
pub mod api;
pub mod live;
