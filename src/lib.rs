//! Verification Job Engine
//!
//! This library provides the core functionality for the enroll-verify system:
//! a job engine that drives multi-step identity verifications against an
//! external service through rotating egress proxies, adapts per-organization
//! targeting from observed outcomes, and synthesizes the identity-document
//! artifact attached to successful jobs.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
