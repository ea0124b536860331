pub mod active_run;
pub mod hub;

pub use active_run::{ActiveRunError, ActiveRunRegistry, InMemoryActiveRunRegistry};
pub use hub::{PubSubHub, SharedPubSubHub, END_STREAM_SIGNAL, STOP_SIGNAL};

#[cfg(feature = "redis-backend")]
pub use active_run::redis_backend::RedisActiveRunRegistry;
