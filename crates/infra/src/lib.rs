//! Infrastructure: configuration, store implementations, the Redis
//! Streams bus, and process lifecycle helpers.

pub mod config;
pub mod memory;
pub mod postgres;
pub mod redis_bus;
pub mod signal;

pub use config::{Config, DbConfig, JwtConfig, ProcessorConfig, RedisConfig};
pub use memory::InMemoryDatabase;
pub use postgres::PostgresDatabase;
pub use redis_bus::RedisStreamsBus;
