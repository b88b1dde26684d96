#![cfg_attr(docsrs, feature(doc_cfg))]
//! Window-based throttle counters, and cooldown locks, kept in an atomic key-value store shared
//! by any number of processes.
//!
//! A [ThrottleRepository] derives store keys from an identity ([ThrottleKey]) and a [Limiter],
//! and reports counts and lock state; what to do about them is up to the caller.
//!
//! ```
//! # use throttle_repository::backend::memory::InMemoryStore;
//! # use throttle_repository::{Limiter, StoreThrottleRepository, ThrottleRepository};
//! # use std::time::Duration;
//! # #[actix_web::main]
//! # async fn main() {
//! let store = InMemoryStore::builder().with_gc_interval(None).build();
//! let repository = StoreThrottleRepository::new(store);
//! let limiter = Limiter::builder()
//!     .limit(5)
//!     .over(Duration::from_secs(60))
//!     .lock_for(Duration::from_secs(300))
//!     .build()
//!     .unwrap();
//! let key = ["login", "user:42"];
//!
//! repository.increment_and_expire(&key, &limiter).await.unwrap();
//! let count = repository.get_count(&key, &limiter).await.unwrap().unwrap_or(0);
//! if count > limiter.limit() as i64 {
//!     repository.set_lock(&key, &limiter).await.unwrap();
//! }
//! # }
//! ```

pub mod backend;
pub mod policy;
pub mod repository;

pub use backend::ThrottleStore;
pub use policy::{Limiter, PolicyError};
pub use repository::{SimpleThrottleKey, StoreThrottleRepository, ThrottleKey, ThrottleRepository};
