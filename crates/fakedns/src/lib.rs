#![warn(clippy::pedantic)]
// Don't care enough to fix
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::wildcard_imports)]

pub mod addresses;
pub mod audit;
pub mod metrics;
pub mod net_util;
pub mod query;
pub mod server;
pub mod settings;
pub mod store;
pub mod synthesise;
pub mod validation;
