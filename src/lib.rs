//! Reactive streams for the Composable Information Machine
//!
//! This crate provides push-based observables with composable operators,
//! hot sources, demand-driven flowables and pluggable schedulers for moving
//! work between threads or running it on virtual time.
//!
//! ```rust,ignore
//! use cim_reactive::prelude::*;
//!
//! let scheduler = VirtualTimeScheduler::new();
//! let observer = Observable::interval(Duration::from_secs(1), scheduler.shared())
//!     .take(3)
//!     .test();
//! scheduler.advance_time_by(Duration::from_secs(3));
//! observer.assert_values(&[0, 1, 2]).assert_complete();
//! ```

pub mod backpressure;
pub mod config;
pub mod errors;
pub mod event;
pub mod hot;
pub mod observable;
pub mod observer;
pub mod operators;
pub mod scheduler;
pub mod subscription;
pub mod testing;

mod sync;

// Re-export commonly used types
pub use backpressure::{BackpressureConfig, BackpressureStrategy, Demand, FlowObserver, Flowable};
pub use config::RuntimeConfig;
pub use errors::{StreamError, StreamResult};
pub use event::{Event, TimeInterval, Timestamped};
pub use hot::{ConnectableObservable, Subject};
pub use observable::Observable;
pub use observer::{FnObserver, LoggingObserver, NullObserver, Observer};
pub use operators::{FnStage, Stage};
pub use scheduler::{Scheduler, SchedulerRef, VirtualTimeScheduler, Worker};
pub use subscription::{SerialSubscription, Subscriber, Subscription};

/// Everything needed to build and run pipelines
pub mod prelude {
    pub use crate::backpressure::{
        demand_channel, BackpressureConfig, BackpressureStrategy, Demand, DemandHandler,
        FlowObserver, Flowable,
    };
    pub use crate::config::RuntimeConfig;
    pub use crate::errors::{StreamError, StreamResult};
    pub use crate::event::{Event, TimeInterval, Timestamped};
    pub use crate::hot::{ConnectableObservable, Subject};
    pub use crate::observable::Observable;
    pub use crate::observer::{FnObserver, LoggingObserver, NullObserver, Observer};
    pub use crate::operators::{FnStage, Stage};
    pub use crate::scheduler::{
        current_thread, new_lane, pool, LaneScheduler, Scheduler, SchedulerRef,
        VirtualTimeScheduler, Worker,
    };
    pub use crate::subscription::{Subscriber, Subscription};
    pub use crate::testing::TestObserver;
    pub use std::time::Duration;
}
