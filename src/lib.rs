mod factory;

pub use factory::*;
pub use rsq_core::*;
pub use rsq_mysql::MySQLDriver;
