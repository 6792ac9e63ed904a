pub mod confidence;
pub mod fingerprint;
pub mod index;
pub mod intent;
pub mod loop_detect;
pub mod pagination;
pub mod retrieval;
pub mod review;
