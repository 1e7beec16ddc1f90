#![allow(dead_code)]

pub mod assertions;
pub mod fixtures;
pub mod server;
pub mod stubs;
pub mod vectors;
