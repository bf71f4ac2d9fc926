//! Common building blocks shared by the DOM type modules

pub mod errors;
pub mod numeric;
