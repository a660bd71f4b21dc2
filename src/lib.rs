//! drover, a package manager and meta build tool for the D programming
//! language.
//!
//! The crate is organized leaf-first: the configuration engine
//! ([`document`]) binds recipe and settings documents onto typed records;
//! [`recipe`] models packages; [`package`] owns the local cache and
//! selections; [`supplier`] fetches from registries and mirrors;
//! [`resolver`] produces selections; [`planner`] turns a resolved graph
//! into build targets; [`builder`] caches artifacts and drives the
//! compiler.

pub mod builder;
pub mod commands;
pub mod console_utils;
pub mod dependency;
pub mod describe;
pub mod document;
pub mod init;
pub mod opt;
pub mod package;
pub mod planner;
pub mod platform;
pub mod project;
pub mod recipe;
pub mod resolver;
pub mod settings;
pub mod supplier;
pub mod version;
