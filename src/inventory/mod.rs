//! Device and service group inventory.
//!
//! Raw IoT Agent records are normalised, duplicate devices are merged, each
//! device is matched to its owning service group and live activity from the
//! context broker is folded into a single display status.

mod key;
mod matching;
mod merge;
mod models;
mod normalize;
mod reconciler;
mod registration;
mod status;
mod view;

pub use key::*;
pub use matching::*;
pub use merge::*;
pub use models::*;
pub use normalize::*;
pub use reconciler::*;
pub use registration::*;
pub use status::*;
pub use view::*;

use crate::fiware::FiwareError;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error(transparent)]
    Fiware(#[from] FiwareError),
    #[error("Sign in to manage the inventory.")]
    NotAuthenticated,
    #[error("Context Broker URL is required.")]
    MissingBroker,
    #[error("Context Broker URL must match a supported FIWARE endpoint ({0}).")]
    BrokerNotAllowed(String),
    #[error("Resource path is required.")]
    MissingResource,
    #[error("Resource path \"{0}\" is already registered. Choose a unique path.")]
    DuplicateResource(String),
    #[error("Entity type is required.")]
    MissingEntityType,
    #[error("Register a service group before adding machines.")]
    NoServiceGroups,
    #[error("Device ID is required.")]
    MissingDeviceId,
    #[error("Select the service group responsible for this machine.")]
    NoServiceGroupSelected,
    #[error("Selected service group is no longer available. Reload and try again.")]
    ServiceGroupGone,
    #[error("Missing service group resource identifier.")]
    MissingResourceIdentifier,
    #[error("{0} JSON error: {1}")]
    AttributeJson(&'static str, String),
    #[error("{0} JSON error: {0} JSON must be an array.")]
    AttributeNotArray(&'static str),
    #[error("Unknown service group: {0}")]
    UnknownServiceGroup(String),
    #[error("Unknown device: {0}")]
    UnknownDevice(String),
}
