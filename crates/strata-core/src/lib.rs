pub mod config;
pub mod container;
pub mod dedup;
pub mod error;
pub mod index;
pub mod pipeline;
pub mod read_cache;
pub mod recipe;
pub mod restore;
pub mod session;
pub mod storage;

#[cfg(test)]
mod tests;
#[cfg(test)]
mod testutil;
