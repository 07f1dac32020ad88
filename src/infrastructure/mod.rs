pub mod backoff;
pub mod bluetooth;
pub mod logging;
pub mod virtual_pointer;
