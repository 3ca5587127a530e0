#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod error;
mod identity;
pub mod naming;
pub mod ownership;
pub mod role_template;
pub mod rules;
pub mod scope;
pub mod subject;

pub use self::{
    error::{Error, Result},
    identity::Identity,
};
