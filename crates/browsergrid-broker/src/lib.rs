//! Task Broker adapters: `redis` for production, `memory` for tests and
//! the CLI's `--broker memory` mode. Both implement
//! `browsergrid_core::ports::outbound::TaskBrokerPort`.

pub mod memory;
pub mod redis_broker;

pub use memory::MemoryBroker;
pub use redis_broker::RedisBroker;
