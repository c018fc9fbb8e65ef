// src/proxy/mod.rs
mod proxy;
mod backend;
mod pool;

pub use proxy::{build_client, ClientAddr, HttpClient, ProxyError, ReverseProxy};
pub(crate) use proxy::join_paths;
pub use backend::{Backend, Upstream};
pub use pool::BackendPool;
