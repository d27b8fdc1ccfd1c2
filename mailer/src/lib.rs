pub mod connectivity;
mod db_core;
pub mod diff;
pub mod error;
pub mod mailer_config;
pub mod model;
pub mod notify;
pub mod observability;
pub mod run;
pub mod store;
pub mod tunnel;

#[cfg(test)]
mod testing;
