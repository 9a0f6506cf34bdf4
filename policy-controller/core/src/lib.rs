#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod config;
pub mod preset;
pub mod resolve;
pub mod template;

pub use self::{
    config::{Shared, UpdateConfig},
    preset::{InvalidPreset, SecurityContextPreset},
    resolve::{Effective, InvalidStrategy, Source, Strategy},
    template::{InvalidTemplateRef, TemplateRef},
};

pub const POLICY_CONTROLLER_NAME: &str = "podguard.io/policy-controller";
