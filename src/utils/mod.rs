pub mod hash;
pub mod http;
pub mod logging;
pub mod timing;
