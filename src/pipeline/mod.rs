pub mod intake;
pub mod extraction;
pub mod fields;
pub mod classify;
pub mod routing;
pub mod provenance;
pub mod delivery;
pub mod mail;
pub mod forward;
pub mod processor;
