//! Core library for webdriver-agent-launcher (wdal)
//!
//! Builds (or reuses) the WebDriverAgent runner, starts it on a device or
//! simulator, confirms readiness through its `/status` endpoint, and tears it
//! down again. The CLI in the `wdal` crate is a thin layer over this crate.
//!
//! Layering, leaves first:
//! - [`process`] / [`exec`]: PID lookup, signal escalation, port listeners
//! - [`identity`] / [`run_descriptor`]: project identity and `.xctestrun` state
//! - [`builder`]: the supervised `xcodebuild` subprocess and readiness probe
//! - [`agent`]: the session orchestrator
//! - [`proxy`]: HTTP clients bound to the agent's URL

pub mod agent;
pub mod builder;
pub mod bundle;
pub mod config;
pub mod device;
pub mod error;
pub mod exec;
pub mod home;
pub mod identity;
pub mod lock;
pub mod logging;
pub mod process;
pub mod proxy;
pub mod run_descriptor;
pub mod status;
pub mod store;
pub mod upgrade;

pub use agent::{AgentSupervisor, SupervisorState};
pub use config::{LauncherConfig, SessionArgs};
pub use error::LaunchError;
pub use status::StatusSnapshot;

/// Port the agent listens on inside the device when none is requested.
pub const DEFAULT_AGENT_PORT: u16 = 8100;

/// Base URL used to reach the agent when no override is supplied.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1";

/// Default bundle id of the runner application.
pub const RUNNER_BUNDLE_ID: &str = "com.facebook.WebDriverAgentRunner";

/// Bundle id of the runner as seen by XCTest when no custom id is requested.
pub const RUNNER_BUNDLE_ID_FOR_XCTEST: &str = "com.facebook.WebDriverAgentRunner.xctrunner";

/// Display name shared by every installed runner package.
pub const RUNNER_BUNDLE_NAME: &str = "WebDriverAgentRunner-Runner";

/// File name of the built runner application.
pub const RUNNER_APP: &str = "WebDriverAgentRunner-Runner.app";

/// Project file inside the `.xcodeproj` bundle that carries the bundle id.
pub const PROJECT_FILE: &str = "project.pbxproj";
