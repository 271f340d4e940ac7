pub mod assemble;
pub mod consts;
pub mod detection;
pub mod error;
pub mod filters;
pub mod flatfield;
pub mod frame;
pub mod io;
pub mod measure;
pub mod pipeline;
pub mod stream;
