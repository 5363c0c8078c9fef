pub mod cache;
pub mod init;
pub mod provider;
pub mod retry;
pub mod search;
pub mod sync;
pub mod transformer;
