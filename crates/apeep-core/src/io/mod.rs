pub mod avi;
pub mod avi_writer;
pub mod environ;
pub mod export;
pub mod image_io;
pub mod scale_bar;

pub use avi::{AviReader, SensorChannel};
pub use avi_writer::AviWriter;
pub use environ::{load_environment, read_environ, EnvironmentRecord, EnvironmentTable};
pub use export::{DiskExporter, ExportOptions, FrameOutput, FrameSink};
