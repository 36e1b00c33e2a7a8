//! SQLite provider for the ormkit runtime

mod connection;
mod factory;
mod services;

pub use connection::{SQLITE_PROVIDER, SqliteConnection};
pub use factory::SqliteProviderFactory;
pub use services::SqliteProviderServices;
