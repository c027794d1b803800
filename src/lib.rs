//! Chokepoint - contention survey engine
//!
//! Instrumented code marks entry to and exit from named, capacity-limited
//! resources ("bottlenecks") through a [`Detector`](detector::Detector). Any
//! number of surveyors aggregate that stream concurrently, each over its own
//! scope: one logical call chain, one thread, the whole process, or rotating
//! wall-clock windows.
//!
//! ```
//! use chokepoint::bottleneck::Bottleneck;
//! use chokepoint::detector::Detector;
//! use chokepoint::survey::{ProcessSurveyor, Surveyor};
//! use std::sync::Arc;
//!
//! let detector = Arc::new(Detector::new());
//! let surveyor = ProcessSurveyor::new(&detector, Some("demo"), None, None).unwrap();
//!
//! let db = Arc::new(Bottleneck::new("db", 10));
//! let guard = detector.enter_bottleneck(&db);
//! drop(guard);
//!
//! let hottest = surveyor.most_utilized_bottleneck().unwrap();
//! assert_eq!(hottest.id(), "db");
//! assert_eq!(hottest.access_count(), 1);
//! ```
//!
//! The engine only measures; it never throttles access.

pub mod bottleneck;
pub mod channel;
pub mod cli;
pub mod clock;
pub mod config;
pub mod detector;
pub mod distributor;
pub mod error;
pub mod filter;
pub mod report;
pub mod survey;
pub mod timer;
pub mod workload;

pub use error::{Result, SurveyError};
