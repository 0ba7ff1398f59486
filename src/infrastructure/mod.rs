pub mod bluetooth;
pub mod input_dispatcher;
pub mod logging;
