//! Side-effecting adapters: filesystem, git, HTTP, subprocesses and the local
//! step library store.

pub mod cache;
pub mod config;
pub mod download;
pub mod env;
pub mod fetch;
pub mod fs_util;
pub mod git;
pub mod integrity;
pub mod library;
pub mod paths;
pub mod platform;
pub mod process;
pub mod retry;
pub mod routes;
