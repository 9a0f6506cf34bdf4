#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod engine;
mod lookup;
pub mod patch;
mod request;
pub mod validate;


pub use self::{
    engine::{Admission, Error},
    lookup::NamespaceLookup,
    request::{Decision, Kind, Mode, Operation, Request},
};
