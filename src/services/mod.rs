//! Mapping services
//!
//! The triplet model, the service that maps triplets to short codes and back, and the
//! affiliate redirect target built from an issued code.

pub mod mapping_service;
pub mod redirect;
pub mod triplet;

pub use mapping_service::{
    HealthReport, HealthStatus, MappingService, FORWARD_PREFIX, REVERSE_PREFIX,
    STORE_PAIR_OPERATION,
};
pub use redirect::{redirect_url, CODE_QUERY_PARAM};
pub use triplet::{Triplet, MAX_FIELD_LENGTH};
