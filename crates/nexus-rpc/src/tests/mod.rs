//! Test module for nexus-rpc
//!
//! Cross-module tests and proptest properties. Module-local unit tests live next to the code
//! they cover.



#[cfg(test)]
pub mod middleware_tests;

#[cfg(test)]
pub mod router_tests;


#[cfg(test)]
pub mod validation_tests;
