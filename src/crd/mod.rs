mod database;
mod database_access;
mod database_class;
mod database_request;

pub use database::*;
pub use database_access::*;
pub use database_class::*;
pub use database_request::*;
