//! Flashcards E2E Test Framework
//!
//! This crate drives the flashcards web application through a real browser:
//! - Runs the app's setup commands and spawns its server as a subprocess
//! - Polls the base URL until the server answers
//! - Launches one browser per suite and one isolated context per test
//! - Captures a screenshot when a test fails, before its context closes
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    E2E Test Runner (Rust)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  run_suite(plan, engine, sink, cases)                       │
//! │    ├── ServerHandle::start()      setup cmds + spawn        │
//! │    ├── wait_until_ready()         200/301/302/304           │
//! │    ├── SuiteSession::launch()     engine + browser          │
//! │    ├── TestRunner::run_test()     per test:                 │
//! │    │     ├── open_test_context()                            │
//! │    │     ├── body(&TestContext)                             │
//! │    │     ├── DiagnosticsHook::after_test()                  │
//! │    │     └── close_test_context()                           │
//! │    ├── SuiteSession::shutdown()   browser, then engine      │
//! │    └── ServerHandle::stop()       SIGTERM, grace, SIGKILL   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Page objects                                               │
//! │    ├── LoginPage, MainPage, ModalComponent                  │
//! │    └── ModalAssertions                                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod accounts;
pub mod assertions;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod pages;
pub mod playwright;
pub mod readiness;
pub mod report;
pub mod runner;
pub mod server;
pub mod session;

pub use config::Settings;
pub use diagnostics::{DiagnosticsHook, MemorySink, ReportSink};
pub use error::{E2eError, E2eResult};
pub use playwright::{PlaywrightContext, PlaywrightEngine};
pub use runner::{run_suite, SuitePlan, TestCase, TestRunner};
pub use session::{SuiteSession, TestContext};
