//! The unprivileged job engine: state machine, step pipelines, job store,
//! and the façade an external HTTP layer drives (spec §2, engine side).
//! Everything that talks to Proxmox directly goes through `helper` over the
//! `HelperClient`/`ContainerManager` boundary; this crate never shells out
//! as root itself.

pub mod api;
pub mod config;
pub mod container;
pub mod error;
pub mod health;
pub mod helper_client;
pub mod job;
pub mod log_channel;
pub mod manifest;
pub mod store;
pub mod terminal;
