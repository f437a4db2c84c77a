pub mod backend;
pub mod config;
pub mod gateway;
pub mod lifecycle;
pub mod network;
pub mod pool;
pub mod server;
pub mod state_machine;

pub mod rpc_proto {
    include!(concat!(env!("OUT_DIR"), "/rpc.rs"));
}
