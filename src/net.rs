pub mod client;
pub mod server;

pub use client::RemoteStub;
pub use server::{BoundServer, DispatchServer};
