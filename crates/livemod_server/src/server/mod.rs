#![forbid(unsafe_code)]

pub mod capabilities;
pub mod connection;
pub mod controller;
pub mod fanout;
pub mod health;
pub mod policy;
pub mod session;
pub mod state;
pub mod trigger;
