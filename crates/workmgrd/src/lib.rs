#![cfg_attr(docsrs, feature(doc_cfg))]

//! Library components for the workmgrd daemon.
//!
//! # Overview
//! This crate exposes:
//! - [`config::Config`]: typed, validated configuration loaded from the
//!   environment with optional file and CLI overrides.
//! - [`source::load`]: consumes the job file.
//! - [`broker`]: the broker traits and scoped connection lifecycle, with the
//!   `lapin` implementation in [`amqp`].
//! - [`publisher::publish`]: publishes one job and interprets the routing
//!   verdict.
//! - [`publish_loop::PublishLoop`]: the periodic publish cycle.
//!
//! # Examples
//! ```rust,no_run
//! use workmgrd::config::Config;
//!
//! # async fn docs() -> anyhow::Result<()> {
//! let cfg = Config::load()?;
//! workmgrd::daemon::run(cfg).await?;
//! # Ok(())
//! # }
//! ```
pub mod amqp;
pub mod broker;
pub mod config;
pub mod daemon;
pub mod logging;
pub mod publish_loop;
pub mod publisher;
pub mod source;
