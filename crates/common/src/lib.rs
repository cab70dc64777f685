// primal-common: shared types and protocol for the Primal Live workspace

pub mod protocol;
pub mod types;
