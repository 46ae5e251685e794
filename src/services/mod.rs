pub mod action_service;
pub mod execution_store;
pub mod listing_service;
pub mod poll_service;
pub mod remote_store;
pub mod scheduler;
pub mod staging_service;

#[cfg(test)]
pub(crate) mod testing;
