pub mod auth;
pub mod config;
pub mod daemon;
pub mod logging;
pub mod remote;
pub mod session;
pub mod storage;
pub mod sync;
