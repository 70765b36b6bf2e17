//! Realtime fan-out for teamboard: who is connected, which rooms they sit in,
//! and how committed todo mutations reach them.

pub mod auth;
pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod notifications;
pub mod publisher;
pub mod registry;
pub mod rooms;
pub mod rules;
