//! Poll HTTP endpoints and turn their responses into sensor states.
//!
//! Each target is fetched on a fixed interval. Every response is read in one
//! of three modes and each declared sensor pulls a value out of it:
//!
//! - **structured**: JSON body, dotted path (`data.items[0].value`)
//! - **markup**: HTML body, CSS selector (`span.price`)
//! - **text**: raw body, regular expression (`price:\s*(\d+)`)
//!
//! Extracted values go through an optional template, a last-known-good
//! retention policy and numeric classification before they are published
//! as a [`SensorState`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use pollsense_core::{FetchConfig, FetchTarget, Locator, PollService, SensorRule};
//!
//! let target = FetchTarget::new(FetchConfig::new("weather", "http://192.168.1.100/api"))
//!     .with_sensor(
//!         SensorRule::new("temperature", Locator::structured("data.temp"))
//!             .with_unit("°C")
//!             .keep_last_value(true),
//!     );
//!
//! let service = PollService::with_reqwest()?;
//! let snapshot = service.add_target(target).await?;
//! println!("{}", snapshot.value("temperature"));
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod extract;
pub mod response;
pub mod retention;
pub mod runner;
pub mod service;
pub mod state;
pub mod template;
pub mod transport;

pub use classify::{classify, StateClass};
pub use config::{
    load_config, parse_config, AttributeRule, FetchConfig, FetchTarget, HttpMethod, Locator,
    MatchSelection, PollsenseConfig, RequestBody, ResponseMode, SensorRule, ValueKind,
};
pub use error::{PollError, Result};
pub use extract::{extract, Extraction, LocatorError};
pub use response::{PollHealth, RawResponse, StatusCategory};
pub use retention::{is_invalid, ValueRetention};
pub use runner::{CyclePhase, FetchCycle, Poller, SnapshotStore, TickOutcome};
pub use service::PollService;
pub use state::{PollEvent, SensorState, TargetSnapshot};
pub use template::{render, render_attributes, Template, TemplateError, TemplateVariables};
pub use transport::{HttpTransport, ReqwestTransport, TransportError};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
