//! Caller identification

pub mod principal;
