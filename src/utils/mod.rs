pub mod cluster;

pub mod convert;

pub mod observability;
