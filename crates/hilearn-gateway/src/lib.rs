pub mod auth;
pub mod chat;
pub mod connection;
pub mod dispatcher;
