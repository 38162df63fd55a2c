pub mod database_ops;
pub mod query;
pub mod runner;
pub mod sources;
pub mod validate;

pub mod util {
    pub mod env;
}
