//! Bullhorn Core - Campaign scheduling and dispatch engine
//!
//! This crate provides the engine that discovers due campaigns, acquires
//! cross-process ownership through a lease row, and drives a paced,
//! resumable, cancelable send loop per campaign through the messaging
//! gateway.

pub mod campaign;
pub mod gateway;

pub use campaign::{
    CampaignError, CampaignScheduler, ConfigUpdate, Dispatcher, DispatcherState, LockManager,
    PacingConfig, Progress, SendingWindow,
};
pub use gateway::{Gateway, GatewayError, HttpGateway, InstanceValidation, OutboundMessage};

#[cfg(test)]
pub(crate) mod testing;
