//! appforge: generation job runner and preview lifecycle core.
//!
//! | Module      | Role                                                        |
//! |-------------|-------------------------------------------------------------|
//! | `stream`    | decode generator output lines                               |
//! | `stage`     | stage markers → record writes, background update queue     |
//! | `store`     | `JobStore` contract, retry wrapper, SQLite store            |
//! | `runner`    | generator subprocess supervision                            |
//! | `workspace` | template seeding, install reconciliation, schema sync, seed |
//! | `registry`  | active-job counter                                          |
//! | `preview`   | the single live preview dev server                          |
//! | `service`   | control-surface operations                                  |
//! | `server`    | HTTP routes over `service`                                  |

pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod preview;
pub mod registry;
pub mod runner;
pub mod server;
pub mod service;
pub mod stage;
pub mod store;
pub mod stream;
pub mod workspace;
