//! Admin RPC surface: list, inspect and stop the queries of a
//! [`QueryManager`](crate::query::QueryManager), and read its memory tables.
//!
//! The Rust types in [`rpc`] are generated from `proto/streamtally.proto`.

pub mod rpc {
    tonic::include_proto!("streamtally");
}

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status};

use crate::error::QueryError;
use crate::query::{QueryHandle, QueryManager, QueryProgress, QueryStatus};
use crate::sink::ResultTable;

mod convert;
mod service;

pub use service::*;

#[cfg(test)]
#[path = "tests/admin_tests.rs"]
mod tests;
