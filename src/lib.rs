pub mod animator;
pub mod api;
pub mod cache;
pub mod clock;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod geo;
pub mod output;
pub mod parser;
pub mod poller;
pub mod render;
pub mod routes;
pub mod source;
pub mod stops;
pub mod vehicle;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
